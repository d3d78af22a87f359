//! Reading API: [`File`] and [`Variable`] handles.
//!
//! A `File` owns its byte source, the decoded superblock and everything
//! decoded once per file: the shared-message cache and one immutable
//! [`VariableMeta`] per variable path. Reads take `&self` and can be issued
//! from several threads at once.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};

use log::debug;

use h5tile_format::group;
use h5tile_format::{
    read_region, ByteSource, Codec, CodecRegistry, CollectingWarnings, DecodeContext, ElementType,
    FileAccessProps, FormatError, LinkTarget, MetadataCache, ObjectHeader, Region, Superblock,
    TypedArray, VariableMeta, Warning,
};

use crate::attributes::{decode_attributes, effective_attributes, find, AttributeValue};
use crate::error::{Error, Result};
use crate::listing::{self, Group};

/// Soft links followed while resolving one path.
const MAX_SOFT_LINKS: usize = 16;

/// Decoded once per variable and shared by every handle to it.
#[derive(Debug)]
pub(crate) struct VariableEntry {
    pub address: u64,
    pub meta: VariableMeta,
    pub attributes: Vec<AttributeValue>,
}

// ---------------------------------------------------------------------------
// File
// ---------------------------------------------------------------------------

/// An open container.
pub struct File {
    source: Arc<dyn ByteSource>,
    superblock: Superblock,
    props: FileAccessProps,
    codecs: CodecRegistry,
    warnings: CollectingWarnings,
    cache: MetadataCache,
    variables: Mutex<HashMap<String, Arc<VariableEntry>>>,
}

impl std::fmt::Debug for File {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("File")
            .field("len", &self.source.len())
            .field("superblock", &self.superblock)
            .field("props", &self.props)
            .finish_non_exhaustive()
    }
}

/// `/a/b` form of a user-supplied path.
fn normalize(path: &str) -> String {
    let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
    format!("/{}", parts.join("/"))
}

fn join(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

pub(crate) fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

impl File {
    /// Open a container with default access properties.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<File> {
        File::open_with(path, FileAccessProps::default())
    }

    /// Open a container, memory-mapped when `props.use_mmap` is set.
    pub fn open_with<P: AsRef<Path>>(path: P, props: FileAccessProps) -> Result<File> {
        let path = path.as_ref();
        let source: Arc<dyn ByteSource> = Arc::from(h5tile_io::open_source(path, props.use_mmap)?);
        debug!("opening {}", path.display());
        File::from_source(source, props)
    }

    /// Decode a container held in memory.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<File> {
        File::from_source(Arc::new(bytes), FileAccessProps::default())
    }

    pub fn from_source(source: Arc<dyn ByteSource>, props: FileAccessProps) -> Result<File> {
        let superblock = Superblock::read(&*source, props.verify_checksums)?;
        Ok(File {
            source,
            superblock,
            props,
            codecs: CodecRegistry::with_defaults(),
            warnings: CollectingWarnings::new(),
            cache: MetadataCache::new(),
            variables: Mutex::new(HashMap::new()),
        })
    }

    /// Release the container. Dropping the handle does the same.
    pub fn close(self) {
        debug!("closing container of {} bytes", self.source.len());
    }

    pub fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    pub fn props(&self) -> &FileAccessProps {
        &self.props
    }

    /// Make a filter available to every subsequent read.
    pub fn register_codec(&mut self, codec: Arc<dyn Codec>) {
        self.codecs.register(codec);
    }

    /// Drain the warnings collected so far.
    pub fn warnings(&self) -> Vec<Warning> {
        self.warnings.drain()
    }

    pub(crate) fn ctx(&self) -> DecodeContext<'_> {
        DecodeContext::new(
            &*self.source,
            &self.superblock,
            &self.props,
            &self.warnings,
            &self.codecs,
            &self.cache,
        )
    }

    pub(crate) fn header(&self, address: u64) -> Result<ObjectHeader> {
        Ok(ObjectHeader::read(&self.ctx(), address)?)
    }

    /// Object header address of `path`.
    pub fn locate(&self, path: &str) -> Result<u64> {
        self.locate_from(&normalize(path), 0)
    }

    fn locate_from(&self, path: &str, soft_links: usize) -> Result<u64> {
        let ctx = self.ctx();
        let mut address = self.superblock.root_group_address;
        let mut here = String::from("/");
        for name in path.split('/').filter(|p| !p.is_empty()) {
            let header = ObjectHeader::read(&ctx, address)?;
            if !header.is_group() {
                return Err(Error::NotAGroup(here));
            }
            let link = group::links(&ctx, &header)?
                .into_iter()
                .find(|l| l.name == name)
                .ok_or_else(|| Error::NotFound(join(&here, name)))?;
            address = match link.target {
                LinkTarget::Hard { address } => address,
                LinkTarget::Soft { path: target } => {
                    if soft_links >= MAX_SOFT_LINKS {
                        return Err(Error::NotFound(join(&here, name)));
                    }
                    let absolute = if target.starts_with('/') {
                        normalize(&target)
                    } else {
                        normalize(&join(&here, &target))
                    };
                    self.locate_from(&absolute, soft_links + 1)?
                }
                LinkTarget::External { filename, path } => {
                    return Err(FormatError::Unsupported(format!(
                        "external link {} -> {filename}:{path}",
                        join(&here, name)
                    ))
                    .into())
                }
            };
            here = join(&here, name);
        }
        Ok(address)
    }

    /// Handle to the variable at `path`. Its metadata is decoded on first
    /// access and cached.
    pub fn variable(&self, path: &str) -> Result<Variable<'_>> {
        let path = normalize(path);
        if let Some(entry) = self.cached(&path) {
            return Ok(Variable { file: self, entry });
        }
        let address = self.locate(&path)?;
        let header = self.header(address)?;
        let entry = self.entry(&path, address, &header)?;
        Ok(Variable { file: self, entry })
    }

    fn cached(&self, path: &str) -> Option<Arc<VariableEntry>> {
        match self.variables.lock() {
            Ok(map) => map.get(path).cloned(),
            Err(poisoned) => poisoned.into_inner().get(path).cloned(),
        }
    }

    pub(crate) fn entry(
        &self,
        path: &str,
        address: u64,
        header: &ObjectHeader,
    ) -> Result<Arc<VariableEntry>> {
        if let Some(entry) = self.cached(path) {
            return Ok(entry);
        }
        if header.is_group() || header.layout().is_none() {
            return Err(Error::NotAVariable(path.to_string()));
        }
        let ctx = self.ctx();
        let entry = Arc::new(VariableEntry {
            address,
            meta: VariableMeta::from_header(path, header)?,
            attributes: decode_attributes(&ctx, header)?,
        });
        let mut map = match self.variables.lock() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        };
        Ok(map.entry(path.to_string()).or_insert(entry).clone())
    }

    /// Read `region` of the variable at `path`, or all of it.
    pub fn read_region(&self, path: &str, region: Option<&Region>) -> Result<TypedArray> {
        self.variable(path)?.read_opt(region)
    }

    /// Attributes of the object (group or variable) at `path`.
    pub fn attributes(&self, path: &str) -> Result<Vec<AttributeValue>> {
        let address = self.locate(path)?;
        let header = self.header(address)?;
        Ok(decode_attributes(&self.ctx(), &header)?)
    }

    /// The group tree with every variable's shape, type, dimensions and
    /// effective attributes.
    pub fn list_variables(&self) -> Result<Group> {
        listing::walk(self)
    }

    /// Indented structural listing, for diffing against other readers.
    pub fn dump(&self) -> Result<String> {
        Ok(listing::render(&self.list_variables()?))
    }

    /// Path of the object an object reference points at, if it is linked
    /// anywhere below the root.
    pub fn resolve_reference(&self, address: u64) -> Result<Option<String>> {
        let ctx = self.ctx();
        let root = self.superblock.root_group_address;
        if address == root {
            return Ok(Some("/".to_string()));
        }
        let mut seen = HashSet::from([root]);
        let mut queue = VecDeque::from([(String::from("/"), root)]);
        while let Some((path, group_address)) = queue.pop_front() {
            let header = ObjectHeader::read(&ctx, group_address)?;
            for link in group::links(&ctx, &header)? {
                let LinkTarget::Hard { address: target } = link.target else {
                    continue;
                };
                let child = join(&path, &link.name);
                if target == address {
                    return Ok(Some(child));
                }
                if seen.insert(target) && ObjectHeader::read(&ctx, target)?.is_group() {
                    queue.push_back((child, target));
                }
            }
        }
        Ok(None)
    }
}

// ---------------------------------------------------------------------------
// Variable
// ---------------------------------------------------------------------------

/// A handle to one variable of an open [`File`].
#[derive(Debug, Clone)]
pub struct Variable<'f> {
    file: &'f File,
    entry: Arc<VariableEntry>,
}

impl<'f> Variable<'f> {
    pub fn path(&self) -> &str {
        &self.entry.meta.path
    }

    pub fn name(&self) -> &str {
        base_name(self.path())
    }

    pub fn shape(&self) -> &[u64] {
        self.entry.meta.shape()
    }

    pub fn element_type(&self) -> &ElementType {
        &self.entry.meta.element_type
    }

    /// Decoded layout, datatype, filters and fill value.
    pub fn meta(&self) -> &VariableMeta {
        &self.entry.meta
    }

    /// Object header address, as stored in object references.
    pub fn address(&self) -> u64 {
        self.entry.address
    }

    /// Every attribute, bookkeeping included.
    pub fn attributes(&self) -> &[AttributeValue] {
        &self.entry.attributes
    }

    pub fn effective_attributes(&self) -> Vec<&AttributeValue> {
        effective_attributes(&self.entry.attributes)
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        find(&self.entry.attributes, name)
    }

    /// Read the whole variable.
    pub fn read(&self) -> Result<TypedArray> {
        self.read_opt(None)
    }

    pub fn read_region(&self, region: &Region) -> Result<TypedArray> {
        self.read_opt(Some(region))
    }

    fn read_opt(&self, region: Option<&Region>) -> Result<TypedArray> {
        Ok(read_region(&self.file.ctx(), &self.entry.meta, region)?)
    }
}
