//! Read-only access to HDF5-style containers.
//!
//! This crate provides a path-based interface on top of `h5tile-format`:
//! open a container, list its variables, read rectangular regions and
//! inspect attributes and dimension scales.
//!
//! ```no_run
//! use h5tile::{File, Region};
//!
//! let file = File::open("data.h5").unwrap();
//! let temp = file.variable("sensors/temperature").unwrap();
//! let slab = temp.read_region(&Region::new(vec![0, 0], vec![2, 3])).unwrap();
//! println!("{:?}: {:?}", slab.shape(), slab.to_f64_vec().unwrap());
//! ```

pub mod attributes;
pub mod dimensions;
pub mod error;
pub mod listing;
pub mod reader;

pub use attributes::{effective_attributes, AttributeValue, HIDDEN_ATTRIBUTES};
pub use dimensions::Dimension;
pub use error::{Error, Result};
pub use listing::{Group, VariableInfo};
pub use reader::{File, Variable};

pub use h5tile_format::{
    ArrayData, ElementType, ErrorKind, FileAccessProps, FormatError, Region, TypedArray, Warning,
};
