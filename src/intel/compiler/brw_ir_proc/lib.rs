/*
 * Copyright © 2022 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

extern crate proc_macro;
extern crate proc_macro2;
#[macro_use]
extern crate quote;
extern crate syn;

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use syn::*;

#[derive(Default)]
struct OpAttrs {
    name: Option<String>,
    hw: Option<u32>,
    math: Option<u32>,
    cmod: bool,
    commutative: bool,
    control_flow: bool,
    send: bool,
    tex: bool,
    logical: bool,
    three_src: bool,
    side_effects: bool,
}

fn parse_op_attrs(attrs: &[Attribute]) -> OpAttrs {
    let mut op = OpAttrs::default();
    for attr in attrs {
        if !attr.path().is_ident("op") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("name") {
                let s: LitStr = meta.value()?.parse()?;
                op.name = Some(s.value());
            } else if meta.path.is_ident("hw") {
                let n: LitInt = meta.value()?.parse()?;
                op.hw = Some(n.base10_parse()?);
            } else if meta.path.is_ident("math") {
                let n: LitInt = meta.value()?.parse()?;
                op.math = Some(n.base10_parse()?);
            } else if meta.path.is_ident("cmod") {
                op.cmod = true;
            } else if meta.path.is_ident("commutative") {
                op.commutative = true;
            } else if meta.path.is_ident("control_flow") {
                op.control_flow = true;
            } else if meta.path.is_ident("send") {
                op.send = true;
            } else if meta.path.is_ident("tex") {
                op.tex = true;
                op.send = true;
            } else if meta.path.is_ident("logical") {
                op.logical = true;
            } else if meta.path.is_ident("three_src") {
                op.three_src = true;
            } else if meta.path.is_ident("side_effects") {
                op.side_effects = true;
            } else {
                return Err(meta.error("unknown op attribute"));
            }
            Ok(())
        })
        .expect("Failed to parse #[op(...)] attribute");
    }
    op
}

fn bool_case(
    ident: &Ident,
    case: &Ident,
    val: bool,
    cases: &mut TokenStream2,
) {
    if val {
        cases.extend(quote! {
            #ident::#case => true,
        });
    }
}

fn option_case(
    ident: &Ident,
    case: &Ident,
    val: Option<u32>,
    cases: &mut TokenStream2,
) {
    if let Some(n) = val {
        cases.extend(quote! {
            #ident::#case => Some(#n),
        });
    }
}

/// Derives the static opcode tables from `#[op(...)]` attributes
///
/// Every variant must be a unit variant.  The generated impl provides
/// `name()`, `hw_opcode()`, `math_function()` and a handful of boolean
/// predicates, plus `fmt::Display` printing the name.
#[proc_macro_derive(OpcodeInfo, attributes(op))]
pub fn derive_opcode_info(input: TokenStream) -> TokenStream {
    let DeriveInput { ident, data, .. } = parse_macro_input!(input);

    let e = match data {
        Data::Enum(e) => e,
        _ => panic!("OpcodeInfo can only be derived for enums"),
    };

    let mut name_cases = TokenStream2::new();
    let mut hw_cases = TokenStream2::new();
    let mut math_cases = TokenStream2::new();
    let mut cmod_cases = TokenStream2::new();
    let mut commutative_cases = TokenStream2::new();
    let mut cf_cases = TokenStream2::new();
    let mut send_cases = TokenStream2::new();
    let mut tex_cases = TokenStream2::new();
    let mut logical_cases = TokenStream2::new();
    let mut three_src_cases = TokenStream2::new();
    let mut side_effect_cases = TokenStream2::new();

    for v in e.variants {
        assert!(
            matches!(v.fields, Fields::Unit),
            "Opcode variants must not carry data"
        );
        let case = v.ident;
        let op = parse_op_attrs(&v.attrs);

        let name = op
            .name
            .unwrap_or_else(|| case.to_string().to_lowercase());
        name_cases.extend(quote! {
            #ident::#case => #name,
        });

        option_case(&ident, &case, op.hw, &mut hw_cases);
        option_case(&ident, &case, op.math, &mut math_cases);
        bool_case(&ident, &case, op.cmod, &mut cmod_cases);
        bool_case(&ident, &case, op.commutative, &mut commutative_cases);
        bool_case(&ident, &case, op.control_flow, &mut cf_cases);
        bool_case(&ident, &case, op.send, &mut send_cases);
        bool_case(&ident, &case, op.tex, &mut tex_cases);
        bool_case(&ident, &case, op.logical, &mut logical_cases);
        bool_case(&ident, &case, op.three_src, &mut three_src_cases);
        bool_case(&ident, &case, op.side_effects, &mut side_effect_cases);
    }

    quote! {
        impl #ident {
            pub fn name(&self) -> &'static str {
                match self {
                    #name_cases
                }
            }

            /// The native opcode number, if this is a hardware opcode
            pub fn hw_opcode(&self) -> Option<u32> {
                match self {
                    #hw_cases
                    _ => None,
                }
            }

            /// The MATH function control value for math opcodes
            pub fn math_function(&self) -> Option<u32> {
                match self {
                    #math_cases
                    _ => None,
                }
            }

            pub fn is_math(&self) -> bool {
                self.math_function().is_some()
            }

            pub fn can_do_cmod(&self) -> bool {
                match self {
                    #cmod_cases
                    _ => false,
                }
            }

            pub fn is_commutative(&self) -> bool {
                match self {
                    #commutative_cases
                    _ => false,
                }
            }

            pub fn is_control_flow(&self) -> bool {
                match self {
                    #cf_cases
                    _ => false,
                }
            }

            /// Returns true for opcodes which become a SEND message
            pub fn is_send(&self) -> bool {
                match self {
                    #send_cases
                    _ => false,
                }
            }

            pub fn is_tex(&self) -> bool {
                match self {
                    #tex_cases
                    _ => false,
                }
            }

            pub fn is_logical(&self) -> bool {
                match self {
                    #logical_cases
                    _ => false,
                }
            }

            pub fn is_three_src(&self) -> bool {
                match self {
                    #three_src_cases
                    _ => false,
                }
            }

            pub fn has_side_effects(&self) -> bool {
                match self {
                    #side_effect_cases
                    _ => false,
                }
            }
        }

        impl fmt::Display for #ident {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.name())
            }
        }
    }
    .into()
}
