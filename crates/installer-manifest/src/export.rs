//! Multi-document YAML export

use std::io::Write;

use installer_common::{Error, Result};

use crate::resource::Resource;

/// Document separator between exported objects
pub const DOCUMENT_SEPARATOR: &str = "---\n";

/// Write every resource as a YAML document, in order
///
/// Output is streamed: when a resource fails to serialize, the documents
/// before it have already been written to `sink`.
pub fn export<W: Write + ?Sized>(resources: &[Resource], sink: &mut W) -> Result<()> {
    for (index, resource) in resources.iter().enumerate() {
        let document = serde_yaml::to_string(&resource.object)
            .map_err(|e| Error::serialization_for_kind(resource.kind(), e.to_string()))?;
        if index > 0 {
            sink.write_all(DOCUMENT_SEPARATOR.as_bytes())?;
        }
        sink.write_all(document.as_bytes())?;
    }
    sink.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{ConfigMap, Namespace};
    use kube::api::ObjectMeta;

    fn namespace(name: &str) -> Resource {
        Resource::new(&Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        })
        .expect("wrap namespace")
    }

    fn config_map(name: &str) -> Resource {
        Resource::new(&ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("stackrox".to_string()),
                ..Default::default()
            },
            ..Default::default()
        })
        .expect("wrap config map")
    }

    fn export_to_string(resources: &[Resource]) -> String {
        let mut out = Vec::new();
        export(resources, &mut out).expect("export should succeed");
        String::from_utf8(out).expect("utf-8 output")
    }

    #[test]
    fn test_export_empty_writes_nothing() {
        assert_eq!(export_to_string(&[]), "");
    }

    #[test]
    fn test_export_single_document_has_no_separator() {
        let out = export_to_string(&[namespace("stackrox")]);
        assert!(!out.contains("---"));
        assert!(out.contains("apiVersion: v1"));
        assert!(out.contains("kind: Namespace"));
        assert!(out.contains("name: stackrox"));
    }

    #[test]
    fn test_export_documents_in_order() {
        let out = export_to_string(&[namespace("stackrox"), config_map("central-config")]);
        let docs: Vec<&str> = out.split(DOCUMENT_SEPARATOR).collect();
        assert_eq!(docs.len(), 2);
        assert!(docs[0].contains("kind: Namespace"));
        assert!(docs[1].contains("kind: ConfigMap"));
        assert!(docs[1].contains("namespace: stackrox"));
    }

    #[test]
    fn test_exported_documents_parse_back() {
        let out = export_to_string(&[config_map("a"), config_map("b")]);
        let names: Vec<String> = out
            .split(DOCUMENT_SEPARATOR)
            .map(|doc| {
                let cm: ConfigMap = serde_yaml::from_str(doc).expect("valid ConfigMap");
                cm.metadata.name.unwrap_or_default()
            })
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
