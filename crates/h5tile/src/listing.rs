//! The variable tree and its textual dump.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::Arc;

use log::debug;

use h5tile_format::group;
use h5tile_format::{ElementType, LinkTarget, ObjectHeader};

use crate::attributes::{decode_attributes, effective_attributes, AttributeValue, DisplayValue};
use crate::dimensions::{self, is_dimension_only, Dimension};
use crate::error::Result;
use crate::reader::{base_name, File, VariableEntry};

/// A group and everything below it.
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub path: String,
    pub name: String,
    /// Dimensions defined by scales in this group.
    pub dimensions: Vec<Dimension>,
    pub variables: Vec<VariableInfo>,
    pub groups: Vec<Group>,
    /// Effective attributes of the group itself.
    pub attributes: Vec<AttributeValue>,
}

/// Summary of one variable.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableInfo {
    pub path: String,
    pub name: String,
    pub shape: Vec<u64>,
    pub element_type: ElementType,
    pub dimensions: Vec<Dimension>,
    /// Effective attributes.
    pub attributes: Vec<AttributeValue>,
}

impl Group {
    /// Variables of this group and every subgroup, depth first.
    pub fn all_variables(&self) -> Vec<&VariableInfo> {
        let mut out: Vec<&VariableInfo> = self.variables.iter().collect();
        for g in &self.groups {
            out.extend(g.all_variables());
        }
        out
    }

    /// The variable at `path`, searching the whole tree.
    pub fn find_variable(&self, path: &str) -> Option<&VariableInfo> {
        self.all_variables().into_iter().find(|v| v.path == path)
    }
}

pub(crate) fn walk(file: &File) -> Result<Group> {
    let root = file.superblock().root_group_address;
    let mut seen = HashSet::from([root]);
    let header = file.header(root)?;
    walk_group(file, "/", root, &header, &mut seen)
}

fn child_path(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

fn walk_group(
    file: &File,
    path: &str,
    address: u64,
    header: &ObjectHeader,
    seen: &mut HashSet<u64>,
) -> Result<Group> {
    let ctx = file.ctx();
    let attributes = decode_attributes(&ctx, header)?;
    let mut entries: Vec<(String, Arc<VariableEntry>)> = Vec::new();
    let mut groups = Vec::new();
    for link in group::links(&ctx, header)? {
        let child = child_path(path, &link.name);
        let LinkTarget::Hard { address: target } = link.target else {
            debug!("{child}: not following {:?}", link.target);
            continue;
        };
        let child_header = file.header(target)?;
        if child_header.is_group() {
            if seen.insert(target) {
                groups.push(walk_group(file, &child, target, &child_header, seen)?);
            } else {
                debug!("{child}: group at {target:#x} already listed");
            }
        } else if child_header.layout().is_some() {
            entries.push((link.name, file.entry(&child, target, &child_header)?));
        } else {
            debug!("{child}: neither group nor variable");
        }
    }

    let named: Vec<(String, &VariableEntry)> = entries
        .iter()
        .map(|(name, entry)| (name.clone(), entry.as_ref()))
        .collect();
    let dims = dimensions::resolve(&named, ctx.warnings);
    let variables = entries
        .iter()
        .zip(dims.per_variable)
        .filter(|((_, entry), _)| !is_dimension_only(entry))
        .map(|((name, entry), dimensions)| VariableInfo {
            path: entry.meta.path.clone(),
            name: name.clone(),
            shape: entry.meta.shape().to_vec(),
            element_type: entry.meta.element_type.clone(),
            dimensions,
            attributes: effective_attributes(&entry.attributes)
                .into_iter()
                .cloned()
                .collect(),
        })
        .collect();
    debug!("group {path} at {address:#x}: {} links", entries.len() + groups.len());
    Ok(Group {
        path: path.to_string(),
        name: base_name(path).to_string(),
        dimensions: dims.defined,
        variables,
        groups,
        attributes: effective_attributes(&attributes).into_iter().cloned().collect(),
    })
}

/// Indented listing of `root`: dimensions, variables with their type,
/// shape and attributes, then subgroups.
pub(crate) fn render(root: &Group) -> String {
    let mut out = String::new();
    render_group(&mut out, root, 0);
    out
}

fn render_group(out: &mut String, g: &Group, depth: usize) {
    let pad = "  ".repeat(depth);
    let _ = writeln!(out, "{pad}group {} {{", g.path);
    for a in &g.attributes {
        let _ = writeln!(out, "{pad}  :{} = {}", a.name, DisplayValue(&a.value));
    }
    if !g.dimensions.is_empty() {
        let _ = writeln!(out, "{pad}  dimensions:");
        for d in &g.dimensions {
            let _ = writeln!(out, "{pad}    {d}");
        }
    }
    if !g.variables.is_empty() {
        let _ = writeln!(out, "{pad}  variables:");
        for v in &g.variables {
            let axes: Vec<String> = v
                .dimensions
                .iter()
                .map(|d| match &d.name {
                    Some(name) => name.clone(),
                    None => d.length.to_string(),
                })
                .collect();
            let _ = writeln!(
                out,
                "{pad}    {} {}({}) shape {:?}",
                v.element_type,
                v.name,
                axes.join(", "),
                v.shape
            );
            for a in &v.attributes {
                let _ = writeln!(out, "{pad}      :{} = {}", a.name, DisplayValue(&a.value));
            }
        }
    }
    for child in &g.groups {
        render_group(out, child, depth + 1);
    }
    let _ = writeln!(out, "{pad}}}");
}
