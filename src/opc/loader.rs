//! Turns a serialized package into the in-memory part graph.
//!
//! `Unmarshaller` builds every part through a `PartFactory` and wires the
//! part-level relationships; `PackageLoader` adds the package-level ones.
//! Internal relationships whose target was not loaded are dropped, so every
//! internal relationship of a loaded package resolves to one of its parts.

use crate::opc::error::Result;
use crate::opc::package::{Package, PartId};
use crate::opc::packuri::PackURI;
use crate::opc::part::PartFactory;
use crate::opc::pkgreader::{PackageReader, SerializedPart, SerializedRelationship};
use crate::opc::rel::RelTarget;
use std::collections::HashMap;
use tracing::debug;

/// Converts serialized parts and relationships into parts of a `Package`.
pub struct Unmarshaller;

impl Unmarshaller {
    /// Construct the parts of `pkg_reader` into `package` and install their
    /// relationships.
    ///
    /// Serialized parts are consumed from the reader. Returns the map from
    /// partname to the handle of the part built for it.
    ///
    /// # Errors
    /// Any error from a part constructor, such as malformed XML in an XML part.
    pub fn unmarshal(
        pkg_reader: &mut PackageReader,
        package: &mut Package,
        factory: &PartFactory,
    ) -> Result<HashMap<PackURI, PartId>> {
        let sparts = pkg_reader.take_sparts();
        let mut parts = HashMap::with_capacity(sparts.len());
        let mut pending = Vec::with_capacity(sparts.len());

        for spart in sparts {
            let SerializedPart {
                partname,
                content_type,
                blob,
                srels,
                ..
            } = spart;
            let part = factory.load(partname.clone(), content_type, blob)?;
            let id = package.add_part(part);
            parts.insert(partname, id);
            pending.push((id, srels));
        }

        for (id, srels) in pending {
            let part = package.part_mut(id)?;
            for srel in &srels {
                if let Some(target) = resolve_target(srel, &parts) {
                    part.load_rel(&srel.reltype, target, &srel.r_id);
                }
            }
        }

        Ok(parts)
    }
}

/// Loads a complete `Package` from a `PackageReader`.
pub struct PackageLoader;

impl PackageLoader {
    /// Unmarshal every part, then install the package relationships that
    /// resolve, keeping their ids.
    pub fn load(mut pkg_reader: PackageReader, factory: &PartFactory) -> Result<Package> {
        let mut package = Package::new();
        let parts = Unmarshaller::unmarshal(&mut pkg_reader, &mut package, factory)?;

        let rels = package.rels_mut();
        rels.clear();
        for srel in pkg_reader.pkg_srels() {
            if let Some(target) = resolve_target(srel, &parts) {
                rels.add_relationship(&srel.reltype, target, &srel.r_id);
            }
        }

        debug!(
            parts = parts.len(),
            package_rels = package.rels().len(),
            "loaded package"
        );
        Ok(package)
    }
}

/// Target of a serialized relationship, or None when it names no loaded part.
fn resolve_target(
    srel: &SerializedRelationship,
    parts: &HashMap<PackURI, PartId>,
) -> Option<RelTarget> {
    if srel.is_external() {
        return Some(RelTarget::External(srel.target_ref.clone()));
    }
    let target = srel
        .target_partname()
        .ok()
        .and_then(|partname| parts.get(&partname).copied());
    if target.is_none() {
        debug!(
            source = %srel.base_uri,
            r_id = %srel.r_id,
            target = %srel.target_ref,
            "dropping relationship to a part that was not loaded"
        );
    }
    target.map(RelTarget::Part)
}
