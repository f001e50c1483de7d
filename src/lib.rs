//! Litchi OPC - the packaging engine underneath Office Open XML documents
//!
//! An Office Open XML file (.pptx, .docx, .xlsx) is a zip archive whose
//! entries ("parts") are linked by a typed, directed relationship graph. This
//! crate loads such an archive into an in-memory part graph, lets callers
//! traverse and edit that graph, and writes it back out.
//!
//! # Features
//!
//! - **Part graph**: parts live in a package-owned arena and are addressed by
//!   copyable `PartId` handles, so cyclic relationship graphs are fine
//! - **Relationships**: per-source collections with rId allocation and lookup
//!   by relationship type
//! - **Part factory**: content type to constructor dispatch, with XML parts
//!   parsed into an editable element tree
//! - **Round trip**: load, edit and save with Deflated or Stored members
//!
//! # Example - Listing the parts of a presentation
//!
//! ```no_run
//! use litchi_opc::Package;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let pkg = Package::open("deck.pptx")?;
//! let pres = pkg.main_document_part()?;
//! println!("main part: {}", pkg.part(pres)?.partname());
//!
//! for rel in pkg.iter_rels() {
//!     println!("{} {} -> {:?}", rel.base_uri(), rel.reltype(), rel.target());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Example - Registering a part type
//!
//! ```no_run
//! use litchi_opc::opc::constants::content_type as ct;
//! use litchi_opc::opc::part::load_xml_part;
//! use litchi_opc::{Package, PartFactory};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let factory = PartFactory::builder()
//!     .register(ct::PML_SLIDE, load_xml_part)
//!     .build();
//! let pkg = Package::open_with_factory("deck.pptx", &factory)?;
//! println!("{} parts", pkg.parts().count());
//! # Ok(())
//! # }
//! ```

pub mod common;
pub mod opc;

pub use opc::{
    BlobPart, OpcError, PackURI, Package, Part, PartFactory, PartId, RelTarget, Relationship,
    Relationships, Result, SaveOptions, XmlPart,
};
