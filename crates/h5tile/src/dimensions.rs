//! Dimension scales: naming the axes of a group's variables.
//!
//! A variable tagged `CLASS = "DIMENSION_SCALE"` defines a dimension named
//! after itself. Other variables point at their scales through a
//! `DIMENSION_LIST` attribute holding one list of object references per
//! axis. Two-dimensional coordinate scales name their second axis by
//! matching its length against the group's dimensions; that match is a
//! heuristic and falls back to an anonymous dimension when it is not
//! unique.

use std::collections::HashMap;
use std::fmt;

use log::debug;

use h5tile_format::{Warning, WarningSink};

use crate::attributes::find;
use crate::reader::VariableEntry;

/// `NAME` prefix marking a scale that exists only to define a dimension.
pub const NETCDF_DIMENSION_ONLY: &str = "This is a netCDF dimension but not a netCDF variable";

/// A named or anonymous axis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dimension {
    pub name: Option<String>,
    pub length: u64,
}

impl Dimension {
    pub fn named(name: impl Into<String>, length: u64) -> Self {
        Dimension {
            name: Some(name.into()),
            length,
        }
    }

    pub fn anonymous(length: u64) -> Self {
        Dimension { name: None, length }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name} = {}", self.length),
            None => write!(f, "(anonymous) = {}", self.length),
        }
    }
}

pub(crate) fn is_scale(entry: &VariableEntry) -> bool {
    find(&entry.attributes, "CLASS")
        .and_then(|a| a.as_string())
        .is_some_and(|c| c == "DIMENSION_SCALE")
}

/// Scales that define a dimension but are not variables in their own right.
pub(crate) fn is_dimension_only(entry: &VariableEntry) -> bool {
    is_scale(entry)
        && find(&entry.attributes, "NAME")
            .and_then(|a| a.as_string())
            .is_some_and(|n| n.starts_with(NETCDF_DIMENSION_ONLY))
}

/// Dimensions of one group.
#[derive(Debug, Default)]
pub(crate) struct GroupDimensions {
    /// Dimensions the group defines, in variable order.
    pub defined: Vec<Dimension>,
    /// Axes of each entry, parallel to the input slice.
    pub per_variable: Vec<Vec<Dimension>>,
}

pub(crate) fn resolve(entries: &[(String, &VariableEntry)], warnings: &dyn WarningSink) -> GroupDimensions {
    let mut defined = Vec::new();
    let mut by_address: HashMap<u64, Dimension> = HashMap::new();
    for (name, entry) in entries {
        if is_scale(entry) {
            let dim = Dimension::named(name.clone(), entry.meta.shape().first().copied().unwrap_or(0));
            by_address.insert(entry.address, dim.clone());
            defined.push(dim);
        }
    }

    let per_variable = entries
        .iter()
        .map(|(name, entry)| {
            let shape = entry.meta.shape();
            if let Some(dims) = from_dimension_list(entry, &by_address) {
                return dims;
            }
            if !is_scale(entry) || shape.is_empty() {
                return shape.iter().map(|&n| Dimension::anonymous(n)).collect();
            }
            let mut dims = vec![Dimension::named(name.clone(), shape[0])];
            if let Some(&second) = shape.get(1) {
                let candidates: Vec<_> = defined
                    .iter()
                    .filter(|d| d.length == second && d.name.as_deref() != Some(name.as_str()))
                    .collect();
                match candidates.as_slice() {
                    [only] => dims.push((*only).clone()),
                    _ => {
                        warnings.warn(Warning::AmbiguousDimension {
                            variable: entry.meta.path.clone(),
                            length: second,
                        });
                        dims.push(Dimension::anonymous(second));
                    }
                }
            }
            dims.extend(shape.iter().skip(2).map(|&n| Dimension::anonymous(n)));
            dims
        })
        .collect();

    GroupDimensions {
        defined,
        per_variable,
    }
}

/// Axes named by a `DIMENSION_LIST` attribute, one reference list per axis.
fn from_dimension_list(
    entry: &VariableEntry,
    scales: &HashMap<u64, Dimension>,
) -> Option<Vec<Dimension>> {
    let list = find(&entry.attributes, "DIMENSION_LIST")?;
    let axes = match list.value.sequences() {
        Ok(axes) => axes,
        Err(e) => {
            debug!("{}: unreadable DIMENSION_LIST: {e}", entry.meta.path);
            return None;
        }
    };
    let shape = entry.meta.shape();
    let dims = shape
        .iter()
        .enumerate()
        .map(|(axis, &length)| {
            axes.get(axis)
                .and_then(|refs| refs.references().ok())
                .and_then(|refs| refs.into_iter().flatten().find_map(|a| scales.get(&a)))
                .filter(|d| d.length == length)
                .cloned()
                .unwrap_or(Dimension::anonymous(length))
        })
        .collect();
    Some(dims)
}
