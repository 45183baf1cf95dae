//! Canonical XML 1.0 and Exclusive XML Canonicalization 1.0.
//!
//! A thin layer over `bergshamra-c14n`. Documents are parsed with `uppsala`;
//! the input is either the document node (whole-document references) or an
//! element apex (`SignedInfo`, `#id` references). A single subtree can be left
//! out, which is how the enveloped-signature transform is applied.

use bergshamra_xml::uppsala::{self, Document, NodeId};
use bergshamra_xml::NodeSet;

pub use bergshamra_c14n::C14nMode;

pub const C14N: &str = "http://www.w3.org/TR/2001/REC-xml-c14n-20010315";
pub const C14N_WITH_COMMENTS: &str = "http://www.w3.org/TR/2001/REC-xml-c14n-20010315#WithComments";
pub const EXC_C14N: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";
pub const EXC_C14N_WITH_COMMENTS: &str = "http://www.w3.org/2001/10/xml-exc-c14n#WithComments";

/// The canonicalization methods accepted in signatures
///
/// Canonical XML 1.1 is parsed by the underlying crate but not allowed here.
pub fn mode_from_uri(uri: &str) -> Option<C14nMode> {
    match C14nMode::from_uri(uri)? {
        C14nMode::Inclusive11 | C14nMode::Inclusive11WithComments => None,
        mode => Some(mode),
    }
}

/// Same-document references never carry comments, whatever the transform says
pub fn without_comments(mode: C14nMode) -> C14nMode {
    if mode.is_exclusive() {
        C14nMode::Exclusive
    } else {
        C14nMode::Inclusive
    }
}

/// Canonical form of the subtree at `apex`, optionally minus the subtree at `excluded`
///
/// `inclusive_prefixes` is the `InclusiveNamespaces PrefixList` of exclusive
/// canonicalization (`#default` names the default namespace); inclusive modes
/// ignore it.
pub fn canonicalize(
    doc: &Document<'_>,
    apex: NodeId,
    mode: C14nMode,
    inclusive_prefixes: &[String],
    excluded: Option<NodeId>,
) -> Result<Vec<u8>, String> {
    let mut nodes = if mode.with_comments() {
        NodeSet::tree_with_comments(apex, doc)
    } else {
        NodeSet::tree_without_comments(apex, doc)
    };
    if let Some(excluded) = excluded {
        nodes = nodes.subtract(&NodeSet::tree_with_comments(excluded, doc));
    }

    bergshamra_c14n::canonicalize_doc(doc, mode, Some(&nodes), inclusive_prefixes).map_err(|e| e.to_string())
}

/// Parses `xml` and canonicalizes the whole document
pub fn canonicalize_str(xml: &str, mode: C14nMode) -> Result<Vec<u8>, String> {
    let doc = uppsala::parse(xml).map_err(|e| e.to_string())?;
    canonicalize(&doc, doc.root(), mode, &[], None)
}
