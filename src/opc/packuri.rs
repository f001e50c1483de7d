/// Provides the PackURI value type and utilities for working with package URIs.
///
/// A PackURI represents a part name within an OPC package, following the URI format
/// defined by the Open Packaging Conventions specification.
use crate::opc::error::{OpcError, Result};
use smallvec::SmallVec;

/// The package pseudo-partname, representing the package itself
pub const PACKAGE_URI: &str = "/";

/// The URI for the [Content_Types].xml part
pub const CONTENT_TYPES_URI: &str = "/[Content_Types].xml";

/// Represents a package URI, which is a partname within an OPC package.
///
/// PackURIs always begin with a forward slash, use forward slashes as path
/// separators and never end with one (the package pseudo-partname `/` aside).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackURI {
    /// The full pack URI string (e.g., "/ppt/slides/slide1.xml")
    uri: String,
}

impl PackURI {
    /// Create a new PackURI from a string.
    ///
    /// # Errors
    /// `InvalidPackUri` when the string does not start with `/`, ends with `/`,
    /// or contains empty, `.` or `..` segments or backslashes.
    pub fn new<S: Into<String>>(uri: S) -> Result<Self> {
        let uri = uri.into();
        Self::validate(&uri)?;
        Ok(PackURI { uri })
    }

    fn validate(uri: &str) -> Result<()> {
        if !uri.starts_with('/') {
            return Err(OpcError::InvalidPackUri(format!(
                "PackURI must begin with slash, got '{}'",
                uri
            )));
        }
        if uri == PACKAGE_URI {
            return Ok(());
        }
        if uri.ends_with('/') {
            return Err(OpcError::InvalidPackUri(format!(
                "PackURI must not end with slash, got '{}'",
                uri
            )));
        }
        if memchr::memchr(b'\\', uri.as_bytes()).is_some() {
            return Err(OpcError::InvalidPackUri(format!(
                "PackURI must not contain backslashes, got '{}'",
                uri
            )));
        }
        if uri[1..].split('/').any(|seg| matches!(seg, "" | "." | "..")) {
            return Err(OpcError::InvalidPackUri(format!(
                "PackURI has an empty or relative segment: '{}'",
                uri
            )));
        }
        Ok(())
    }

    /// Create a PackURI from a relative reference and a base URI.
    ///
    /// This translates a relative reference (like "../slideLayouts/slideLayout1.xml")
    /// onto a base URI (like "/ppt/slides") to produce an absolute PackURI
    /// (like "/ppt/slideLayouts/slideLayout1.xml"). A reference that is already
    /// absolute is only normalized.
    pub fn from_rel_ref(base_uri: &str, relative_ref: &str) -> Result<Self> {
        let joined = if relative_ref.starts_with('/') {
            relative_ref.to_string()
        } else if base_uri.ends_with('/') {
            format!("{}{}", base_uri, relative_ref)
        } else {
            format!("{}/{}", base_uri, relative_ref)
        };
        Self::new(Self::normalize_path(&joined))
    }

    /// Get the base URI (directory portion) of this PackURI.
    ///
    /// For example, "/ppt/slides" for "/ppt/slides/slide1.xml".
    /// For the package pseudo-partname "/", returns "/".
    pub fn base_uri(&self) -> &str {
        match self.uri.rfind('/') {
            Some(0) | None => "/",
            Some(pos) => &self.uri[..pos],
        }
    }

    /// Get the filename portion of this PackURI.
    ///
    /// For example, "slide1.xml" for "/ppt/slides/slide1.xml".
    /// For the package pseudo-partname "/", returns an empty string.
    pub fn filename(&self) -> &str {
        match self.uri.rfind('/') {
            Some(pos) => &self.uri[pos + 1..],
            None => "",
        }
    }

    /// Get the extension portion of this PackURI, without the leading period.
    pub fn ext(&self) -> &str {
        let filename = self.filename();
        match filename.rfind('.') {
            Some(pos) => &filename[pos + 1..],
            None => "",
        }
    }

    /// Get the partname index for tuple partnames, or None for singleton partnames.
    ///
    /// For example, returns 21 for "/ppt/slides/slide21.xml" and None for
    /// "/ppt/presentation.xml".
    pub fn idx(&self) -> Option<u32> {
        let filename = self.filename();
        let stem = match filename.rfind('.') {
            Some(pos) => &filename[..pos],
            None => filename,
        };
        let digits = stem
            .bytes()
            .rev()
            .take_while(|b| b.is_ascii_digit())
            .count();
        // a bare number is not a tuple partname
        if digits == 0 || digits == stem.len() {
            return None;
        }
        atoi_simd::parse::<u32, false, false>(&stem.as_bytes()[stem.len() - digits..]).ok()
    }

    /// Get the membername (URI with leading slash stripped).
    ///
    /// This is the form used as the Zip file membername for the package item.
    /// Returns an empty string for the package pseudo-partname "/".
    pub fn membername(&self) -> &str {
        &self.uri[1..]
    }

    /// Get the relative reference from a base URI to this PackURI.
    ///
    /// For example, PackURI("/ppt/slideLayouts/slideLayout1.xml") would return
    /// "../slideLayouts/slideLayout1.xml" for base_uri "/ppt/slides".
    pub fn relative_ref(&self, base_uri: &str) -> String {
        if base_uri == PACKAGE_URI {
            return self.membername().to_string();
        }

        let from: SmallVec<[&str; 8]> = base_uri.split('/').filter(|s| !s.is_empty()).collect();
        let to: SmallVec<[&str; 8]> = self.uri.split('/').filter(|s| !s.is_empty()).collect();

        // the last segment of `to` is the filename and never part of the common prefix
        let common = from
            .iter()
            .zip(to.iter().take(to.len().saturating_sub(1)))
            .take_while(|(a, b)| a == b)
            .count();

        let mut result = String::with_capacity(self.uri.len());
        for _ in common..from.len() {
            result.push_str("../");
        }
        result.push_str(&to[common..].join("/"));
        result
    }

    /// Get the PackURI of the .rels part corresponding to this PackURI.
    ///
    /// For example, "/ppt/slides/_rels/slide1.xml.rels" for
    /// "/ppt/slides/slide1.xml" and "/_rels/.rels" for the package itself.
    pub fn rels_uri(&self) -> Result<PackURI> {
        let base_uri = self.base_uri();
        let rels_uri = if base_uri == PACKAGE_URI {
            format!("/_rels/{}.rels", self.filename())
        } else {
            format!("{}/_rels/{}.rels", base_uri, self.filename())
        };
        Self::new(rels_uri)
    }

    /// Get the full URI string.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.uri
    }

    /// Collapse "." and ".." segments of an absolute path.
    fn normalize_path(path: &str) -> String {
        let mut parts: SmallVec<[&str; 8]> = SmallVec::new();
        for segment in path.split('/') {
            match segment {
                "" | "." => {},
                ".." => {
                    parts.pop();
                },
                _ => parts.push(segment),
            }
        }
        let mut normalized = String::with_capacity(path.len());
        for segment in parts {
            normalized.push('/');
            normalized.push_str(segment);
        }
        if normalized.is_empty() {
            normalized.push('/');
        }
        normalized
    }
}

impl std::fmt::Display for PackURI {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.uri)
    }
}

impl AsRef<str> for PackURI {
    fn as_ref(&self) -> &str {
        &self.uri
    }
}

impl std::str::FromStr for PackURI {
    type Err = OpcError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<&str> for PackURI {
    type Error = OpcError;

    fn try_from(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl PartialEq<str> for PackURI {
    fn eq(&self, other: &str) -> bool {
        self.uri == other
    }
}

impl PartialEq<&str> for PackURI {
    fn eq(&self, other: &&str) -> bool {
        self.uri == *other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packuri_new() {
        assert!(PackURI::new("/ppt/presentation.xml").is_ok());
        assert!(PackURI::new("/").is_ok());
        assert!(PackURI::new("ppt/presentation.xml").is_err());
        assert!(PackURI::new("/ppt/slides/").is_err());
        assert!(PackURI::new("/ppt//slide1.xml").is_err());
        assert!(PackURI::new("/ppt/../slide1.xml").is_err());
        assert!(PackURI::new("/ppt\\slide1.xml").is_err());
    }

    #[test]
    fn test_from_rel_ref() {
        let uri = PackURI::from_rel_ref("/ppt/slides", "../slideLayouts/slideLayout1.xml").unwrap();
        assert_eq!(uri, "/ppt/slideLayouts/slideLayout1.xml");

        let uri = PackURI::from_rel_ref("/", "ppt/presentation.xml").unwrap();
        assert_eq!(uri, "/ppt/presentation.xml");

        let uri = PackURI::from_rel_ref("/ppt/slides", "./slide2.xml").unwrap();
        assert_eq!(uri, "/ppt/slides/slide2.xml");

        let uri = PackURI::from_rel_ref("/ppt/slides", "/ppt/media/image1.png").unwrap();
        assert_eq!(uri, "/ppt/media/image1.png");
    }

    #[test]
    fn test_relative_ref() {
        let uri = PackURI::new("/ppt/slideLayouts/slideLayout1.xml").unwrap();
        assert_eq!(uri.relative_ref("/ppt/slides"), "../slideLayouts/slideLayout1.xml");
        assert_eq!(uri.relative_ref("/"), "ppt/slideLayouts/slideLayout1.xml");

        let uri = PackURI::new("/ppt/slides/slide2.xml").unwrap();
        assert_eq!(uri.relative_ref("/ppt/slides"), "slide2.xml");

        let uri = PackURI::new("/docProps/core.xml").unwrap();
        assert_eq!(uri.relative_ref("/ppt/slides"), "../../docProps/core.xml");
    }

    #[test]
    fn test_relative_ref_resolves_back() {
        for (base, target) in [
            ("/ppt/slides", "/ppt/slideLayouts/slideLayout1.xml"),
            ("/ppt", "/ppt/slides/slide1.xml"),
            ("/ppt/slides", "/ppt/slides/slides/slide1.xml"),
            ("/a/b/c", "/x.xml"),
        ] {
            let uri = PackURI::new(target).unwrap();
            let rel = uri.relative_ref(base);
            assert_eq!(PackURI::from_rel_ref(base, &rel).unwrap(), uri, "{base} -> {rel}");
        }
    }

    #[test]
    fn test_base_uri_and_filename() {
        let uri = PackURI::new("/ppt/slides/slide1.xml").unwrap();
        assert_eq!(uri.base_uri(), "/ppt/slides");
        assert_eq!(uri.filename(), "slide1.xml");
        assert_eq!(uri.ext(), "xml");

        let uri = PackURI::new("/presentation.xml").unwrap();
        assert_eq!(uri.base_uri(), "/");

        let root = PackURI::new(PACKAGE_URI).unwrap();
        assert_eq!(root.base_uri(), "/");
        assert_eq!(root.filename(), "");
        assert_eq!(root.membername(), "");
    }

    #[test]
    fn test_idx() {
        assert_eq!(PackURI::new("/ppt/slides/slide21.xml").unwrap().idx(), Some(21));
        assert_eq!(PackURI::new("/ppt/presentation.xml").unwrap().idx(), None);
        assert_eq!(PackURI::new("/ppt/media/42.png").unwrap().idx(), None);
    }

    #[test]
    fn test_rels_uri() {
        let uri = PackURI::new("/ppt/slides/slide1.xml").unwrap();
        assert_eq!(uri.rels_uri().unwrap(), "/ppt/slides/_rels/slide1.xml.rels");

        let root = PackURI::new(PACKAGE_URI).unwrap();
        assert_eq!(root.rels_uri().unwrap(), "/_rels/.rels");
    }
}
