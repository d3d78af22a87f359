//! Decoded attribute values and the effective (user-facing) view.

use std::fmt;

use log::trace;

use h5tile_format::{
    materialize, ArrayData, DecodeContext, ElementType, FormatError, ObjectHeader, TypedArray,
    Warning,
};

/// Attributes that encode dimension-scale and netCDF bookkeeping rather
/// than user metadata.
pub const HIDDEN_ATTRIBUTES: [&str; 6] = [
    "CLASS",
    "DIMENSION_LIST",
    "NAME",
    "REFERENCE_LIST",
    "_Netcdf4Dimid",
    "_Netcdf4Coordinates",
];

/// An attribute with its value decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeValue {
    pub name: String,
    pub value: TypedArray,
}

impl AttributeValue {
    /// The first string element, for string-typed attributes.
    pub fn as_string(&self) -> Option<String> {
        self.value.to_strings().ok()?.into_iter().next()
    }

    pub fn is_hidden(&self) -> bool {
        HIDDEN_ATTRIBUTES.contains(&self.name.as_str())
    }
}

/// Every attribute of `header`, compact and dense, in storage order.
///
/// Attributes whose type or value cannot be decoded are reported through
/// the warning sink and left out.
pub(crate) fn decode_attributes(
    ctx: &DecodeContext<'_>,
    header: &ObjectHeader,
) -> Result<Vec<AttributeValue>, FormatError> {
    let mut raw: Vec<_> = header.attributes().cloned().collect();
    if let Some(info) = header.attribute_info().filter(|i| i.is_dense()) {
        raw.extend(info.dense_attributes(ctx)?);
    }
    let mut out = Vec::with_capacity(raw.len());
    for attr in raw {
        let decoded = ElementType::resolve(&attr.datatype).and_then(|ty| {
            materialize(ctx, &ty, attr.dataspace.dims.clone(), attr.raw)
        });
        match decoded {
            Ok(value) => {
                trace!("attribute {} : {}", attr.name, value.element_type());
                out.push(AttributeValue {
                    name: attr.name,
                    value,
                });
            }
            Err(e) => ctx.warnings.warn(Warning::UnsupportedAttribute {
                name: attr.name,
                reason: e.to_string(),
            }),
        }
    }
    Ok(out)
}

/// The attributes a user sees: everything except the bookkeeping names.
pub fn effective_attributes(attrs: &[AttributeValue]) -> Vec<&AttributeValue> {
    attrs.iter().filter(|a| !a.is_hidden()).collect()
}

pub(crate) fn find<'a>(attrs: &'a [AttributeValue], name: &str) -> Option<&'a AttributeValue> {
    attrs.iter().find(|a| a.name == name)
}

/// Renders an attribute value the way the structural dump prints it.
pub(crate) struct DisplayValue<'a>(pub &'a TypedArray);

impl fmt::Display for DisplayValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let array = self.0;
        if let Ok(strings) = array.to_strings() {
            let quoted: Vec<_> = strings.iter().map(|s| format!("{s:?}")).collect();
            return f.write_str(&quoted.join(", "));
        }
        match array.element_type() {
            ElementType::Int { .. } | ElementType::Enum { .. } => {
                if let Ok(values) = array.to_i64_vec() {
                    return write_list(f, &values);
                }
                if let Ok(values) = array.to_u64_vec() {
                    return write_list(f, &values);
                }
            }
            ElementType::Float { .. } => {
                if let Ok(values) = array.to_f64_vec() {
                    return write_list(f, &values);
                }
            }
            _ => {}
        }
        match array.data() {
            ArrayData::Sequences(s) => write!(f, "<{} sequences of {}>", s.len(), array.element_type()),
            _ => write!(f, "<{} x {}>", array.len(), array.element_type()),
        }
    }
}

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, values: &[T]) -> fmt::Result {
    for (i, v) in values.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{v}")?;
    }
    Ok(())
}
