//! Parsing of SMP `ServiceGroup` and `SignedServiceMetadata` documents.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use roxmltree::{Document, Node};
use url::Url;

use crate::error::MetadataError;
use crate::fetcher::MetadataXml;
use crate::types::{
    DocumentTypeIdentifier, Endpoint, ParticipantIdentifier, Process, ProcessIdentifier,
    ServiceGroup, ServiceInformation, ServiceMetadataDocument,
};

/// Namespaces of the BusDox metadata documents
pub mod ns {
    pub const PUBLISHING: &str = "http://busdox.org/serviceMetadata/publishing/1.0/";
    pub const IDENTIFIERS: &str = "http://busdox.org/transport/identifiers/1.0/";
    pub const ADDRESSING: &str = "http://www.w3.org/2005/08/addressing";
}

fn child<'a, 'input>(
    node: Node<'a, 'input>,
    ns_uri: &str,
    local_name: &str,
) -> Option<Node<'a, 'input>> {
    node.children().find(|n| is_element(n, ns_uri, local_name))
}

fn children<'a, 'input>(
    node: Node<'a, 'input>,
    ns_uri: &'a str,
    local_name: &'a str,
) -> impl Iterator<Item = Node<'a, 'input>> + 'a {
    node.children().filter(move |n| is_element(n, ns_uri, local_name))
}

fn is_element(node: &Node<'_, '_>, ns_uri: &str, local_name: &str) -> bool {
    node.is_element()
        && node.tag_name().name() == local_name
        && node.tag_name().namespace().unwrap_or("") == ns_uri
}

/// Concatenated, trimmed text content of an element
fn text_of(node: Node<'_, '_>) -> String {
    node.descendants()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .collect::<String>()
        .trim()
        .to_string()
}

fn optional_text(node: Node<'_, '_>, ns_uri: &str, local_name: &str) -> Option<String> {
    child(node, ns_uri, local_name)
        .map(text_of)
        .filter(|t| !t.is_empty())
}

fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn identifier_parts(node: Node<'_, '_>) -> Result<(String, String), MetadataError> {
    let scheme = node
        .attribute("scheme")
        .ok_or(MetadataError::MissingAttribute("scheme"))?;
    Ok((scheme.to_string(), text_of(node)))
}

/// Parses a `ServiceGroup` document
pub fn parse_service_group(xml: &MetadataXml) -> Result<ServiceGroup, MetadataError> {
    let doc = Document::parse(xml.as_str())?;
    let root = doc.root_element();
    if !is_element(&root, ns::PUBLISHING, "ServiceGroup") {
        return Err(MetadataError::UnexpectedRoot(root.tag_name().name().to_string()));
    }

    let participant = child(root, ns::IDENTIFIERS, "ParticipantIdentifier")
        .ok_or(MetadataError::MissingElement("ParticipantIdentifier"))?;
    let (scheme, value) = identifier_parts(participant)?;

    let service_metadata_references = child(root, ns::PUBLISHING, "ServiceMetadataReferenceCollection")
        .map(|collection| {
            children(collection, ns::PUBLISHING, "ServiceMetadataReference")
                .filter_map(|r| r.attribute("href").map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    Ok(ServiceGroup {
        participant: ParticipantIdentifier { scheme, value },
        service_metadata_references,
    })
}

/// Parses the `ServiceMetadata` body of a `SignedServiceMetadata` document.
///
/// Signature checks are not performed here.
pub fn parse_signed_service_metadata(
    xml: &MetadataXml,
) -> Result<ServiceMetadataDocument, MetadataError> {
    let doc = Document::parse(xml.as_str())?;
    let root = doc.root_element();
    if !is_element(&root, ns::PUBLISHING, "SignedServiceMetadata") {
        return Err(MetadataError::UnexpectedRoot(root.tag_name().name().to_string()));
    }

    let metadata = child(root, ns::PUBLISHING, "ServiceMetadata")
        .ok_or(MetadataError::MissingElement("ServiceMetadata"))?;

    if let Some(redirect) = child(metadata, ns::PUBLISHING, "Redirect") {
        let href = redirect
            .attribute("href")
            .ok_or(MetadataError::MissingAttribute("href"))?;
        let href = Url::parse(href.trim())
            .map_err(|e| MetadataError::InvalidUrl(href.to_string(), e))?;
        let certificate_uid = child(redirect, ns::PUBLISHING, "CertificateUID")
            .map(text_of)
            .ok_or(MetadataError::MissingElement("CertificateUID"))?;
        return Ok(ServiceMetadataDocument::Redirect {
            href,
            certificate_uid,
        });
    }

    let info = child(metadata, ns::PUBLISHING, "ServiceInformation")
        .ok_or(MetadataError::EmptyServiceMetadata)?;
    Ok(ServiceMetadataDocument::ServiceInformation(parse_service_information(info)?))
}

fn parse_service_information(info: Node<'_, '_>) -> Result<ServiceInformation, MetadataError> {
    let participant = child(info, ns::IDENTIFIERS, "ParticipantIdentifier")
        .map(identifier_parts)
        .transpose()?
        .map(|(scheme, value)| ParticipantIdentifier { scheme, value });
    let document_type = child(info, ns::IDENTIFIERS, "DocumentIdentifier")
        .map(identifier_parts)
        .transpose()?
        .map(|(scheme, value)| DocumentTypeIdentifier { scheme, value });

    let mut processes = Vec::new();
    if let Some(list) = child(info, ns::PUBLISHING, "ProcessList") {
        for process in children(list, ns::PUBLISHING, "Process") {
            let identifier = child(process, ns::IDENTIFIERS, "ProcessIdentifier")
                .ok_or(MetadataError::MissingElement("ProcessIdentifier"))?;
            let (scheme, value) = identifier_parts(identifier)?;

            let endpoints = child(process, ns::PUBLISHING, "ServiceEndpointList")
                .map(|list| {
                    children(list, ns::PUBLISHING, "Endpoint")
                        .map(parse_endpoint)
                        .collect()
                })
                .unwrap_or_default();

            processes.push(Process {
                identifier: ProcessIdentifier { scheme, value },
                endpoints,
            });
        }
    }

    Ok(ServiceInformation {
        participant,
        document_type,
        processes,
    })
}

fn parse_endpoint(endpoint: Node<'_, '_>) -> Endpoint {
    let address = child(endpoint, ns::ADDRESSING, "EndpointReference")
        .and_then(|reference| optional_text(reference, ns::ADDRESSING, "Address"));
    let pub_text = |name| optional_text(endpoint, ns::PUBLISHING, name);

    Endpoint {
        transport_profile: endpoint.attribute("transportProfile").map(str::to_string),
        address,
        require_business_level_signature: pub_text("RequireBusinessLevelSignature")
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1"),
        minimum_authentication_level: pub_text("MinimumAuthenticationLevel"),
        service_activation_date: pub_text("ServiceActivationDate").and_then(|v| parse_date(&v)),
        service_expiration_date: pub_text("ServiceExpirationDate").and_then(|v| parse_date(&v)),
        certificate: pub_text("Certificate"),
        service_description: pub_text("ServiceDescription"),
        technical_contact_url: pub_text("TechnicalContactUrl"),
        technical_information_url: pub_text("TechnicalInformationUrl"),
    }
}
