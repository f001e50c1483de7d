//! Open Packaging Conventions (OPC) implementation.
//!
//! This module provides the packaging layer of Office Open XML documents:
//! a zip archive of parts connected by a typed relationship graph.
//! It includes support for:
//!
//! - Package structure (parts, relationships) as an arena of parts addressed
//!   by `PartId`, tolerant of cyclic relationship graphs
//! - Content type management
//! - ZIP-based physical packaging
//! - Pluggable part construction through `PartFactory`
//!
//! # Example
//!
//! ```no_run
//! use litchi_opc::opc::{Package, constants::relationship_type as rt};
//!
//! let mut pkg = Package::open("deck.pptx")?;
//! for part in pkg.parts() {
//!     println!("{} ({})", part.partname(), part.content_type());
//! }
//!
//! let pres = pkg.main_document_part()?;
//! let partname = pkg.next_partname("/ppt/media/image%d.png")?;
//! let image = pkg.add_part(Box::new(litchi_opc::opc::BlobPart::new(
//!     partname,
//!     "image/png".to_string(),
//!     std::fs::read("logo.png")?,
//! )));
//! pkg.part_mut(pres)?.relate_to(image, rt::IMAGE);
//! pkg.save("copy.pptx")?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
pub mod constants;
pub mod error;
pub mod loader;
pub mod package;
pub mod packuri;
pub mod part;
pub mod phys_pkg;
pub mod pkgreader;
pub mod pkgwriter;
pub mod rel;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use error::{OpcError, Result};
pub use loader::{PackageLoader, Unmarshaller};
pub use package::{IterParts, IterRels, Package, PartId};
pub use packuri::PackURI;
pub use part::{BlobPart, Part, PartConstructor, PartFactory, PartFactoryBuilder, XmlPart};
pub use pkgreader::PackageReader;
pub use pkgwriter::{Compression, PackageWriter, SaveOptions};
pub use rel::{RelTarget, Relationship, Relationships, TargetMode};
