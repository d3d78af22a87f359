//! Binary decoding core for HDF5-style containers.
//!
//! This crate turns bytes into structure: superblock, object headers and
//! their messages, the B-tree and heap indexes, chunk tiling and the filter
//! pipeline. It reads through a [`ByteSource`] and never opens files
//! itself; `h5tile-io` provides the file-backed sources and `h5tile` the
//! path-based API on top.

pub mod assembler;
pub mod attribute;
pub mod attribute_info;
pub mod btree_v1;
pub mod btree_v2;
pub mod checksum;
pub mod codec;
pub mod context;
pub mod data_layout;
pub mod dataspace;
pub mod datatype;
pub mod element_type;
pub mod error;
pub mod fill_value;
pub mod filter_pipeline;
pub mod fractal_heap;
pub mod global_heap;
pub mod group;
pub mod hyperslab;
pub mod link;
pub mod message_type;
pub mod object_header;
pub mod props;
pub mod shared;
pub mod source;
pub mod superblock;
pub mod symbol_table;
pub mod tiling;
pub mod typed_array;
pub mod warnings;

pub use assembler::{materialize, read_region, VariableMeta};
pub use attribute::Attribute;
pub use codec::{Codec, CodecParams, CodecRegistry};
pub use context::{DecodeContext, MetadataCache};
pub use data_layout::{ChunkIndex, DataLayout};
pub use dataspace::{Dataspace, DataspaceType};
pub use datatype::{CharacterSet, Datatype, ReferenceKind, StringPadding};
pub use element_type::{ElementType, Member};
pub use error::{ErrorKind, FormatError, ResultExt};
pub use fill_value::FillValue;
pub use filter_pipeline::{FilterDescription, FilterPipeline};
pub use hyperslab::Region;
pub use link::{Link, LinkTarget};
pub use object_header::{HeaderMessage, ObjectHeader};
pub use props::FileAccessProps;
pub use source::{ByteSource, Endian, Sizes};
pub use superblock::Superblock;
pub use tiling::Tiling;
pub use typed_array::{ArrayData, TypedArray};
pub use warnings::{CollectingWarnings, LogWarnings, Warning, WarningSink};
