use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// A DTN endpoint identifier.
///
/// Endpoints name the source, destination, and report-to parties of a
/// bundle. The canonical form is `dtn://<node>/<application>`; the
/// application part may be empty for node-level endpoints, and the special
/// null endpoint `dtn:none` names nobody (used for anonymous bundles and
/// suppressed reports).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EndpointId {
    node: String,
    application: String,
}

impl EndpointId {
    /// The null endpoint, `dtn:none`.
    pub fn none() -> Self {
        Self {
            node: String::new(),
            application: String::new(),
        }
    }

    /// Parse an endpoint from its URI form.
    ///
    /// Accepts `dtn://node`, `dtn://node/application`, and `dtn:none`.
    pub fn parse(uri: &str) -> Result<Self, TypeError> {
        if uri == "dtn:none" {
            return Ok(Self::none());
        }
        let rest = uri
            .strip_prefix("dtn://")
            .ok_or_else(|| TypeError::InvalidEndpoint(uri.to_string()))?;
        if rest.is_empty() {
            return Err(TypeError::InvalidEndpoint(uri.to_string()));
        }
        let (node, application) = match rest.split_once('/') {
            Some((node, app)) => (node, app),
            None => (rest, ""),
        };
        if node.is_empty() {
            return Err(TypeError::InvalidEndpoint(uri.to_string()));
        }
        Ok(Self {
            node: node.to_string(),
            application: application.to_string(),
        })
    }

    /// Returns `true` if this is the null endpoint.
    pub fn is_none(&self) -> bool {
        self.node.is_empty()
    }

    /// The node part of the URI (`node-one` in `dtn://node-one/test`).
    pub fn node(&self) -> &str {
        &self.node
    }

    /// The application part of the URI (`test` in `dtn://node-one/test`).
    pub fn application(&self) -> &str {
        &self.application
    }

    /// Returns `true` if this endpoint names a single application rather
    /// than a whole node.
    pub fn is_singleton(&self) -> bool {
        !self.application.is_empty()
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "dtn:none")
        } else if self.application.is_empty() {
            write!(f, "dtn://{}", self.node)
        } else {
            write!(f, "dtn://{}/{}", self.node, self.application)
        }
    }
}

impl fmt::Debug for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EndpointId({self})")
    }
}

impl std::str::FromStr for EndpointId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parse_full_endpoint() {
        let eid = EndpointId::parse("dtn://node-one/test").unwrap();
        assert_eq!(eid.node(), "node-one");
        assert_eq!(eid.application(), "test");
        assert!(eid.is_singleton());
        assert!(!eid.is_none());
    }

    #[test]
    fn parse_node_endpoint() {
        let eid = EndpointId::parse("dtn://node-one").unwrap();
        assert_eq!(eid.node(), "node-one");
        assert_eq!(eid.application(), "");
        assert!(!eid.is_singleton());
    }

    #[test]
    fn parse_null_endpoint() {
        let eid = EndpointId::parse("dtn:none").unwrap();
        assert!(eid.is_none());
        assert_eq!(eid, EndpointId::none());
    }

    #[test]
    fn parse_rejects_bad_scheme() {
        assert!(EndpointId::parse("http://node-one/test").is_err());
        assert!(EndpointId::parse("node-one/test").is_err());
        assert!(EndpointId::parse("").is_err());
        assert!(EndpointId::parse("dtn://").is_err());
        assert!(EndpointId::parse("dtn:///app").is_err());
    }

    #[test]
    fn display_roundtrip() {
        for uri in ["dtn://node-one/test", "dtn://node-one", "dtn:none"] {
            let eid = EndpointId::parse(uri).unwrap();
            assert_eq!(eid.to_string(), uri);
        }
    }

    #[test]
    fn ordering_is_by_node_then_application() {
        let a = EndpointId::parse("dtn://alpha/z").unwrap();
        let b = EndpointId::parse("dtn://beta/a").unwrap();
        assert!(a < b);

        let c = EndpointId::parse("dtn://alpha/a").unwrap();
        assert!(c < a);
    }

    proptest! {
        #[test]
        fn parse_display_roundtrip(
            node in "[a-z][a-z0-9-]{0,15}",
            app in "[a-z0-9/._-]{0,20}",
        ) {
            let uri = if app.is_empty() {
                format!("dtn://{node}")
            } else {
                format!("dtn://{node}/{app}")
            };
            let eid = EndpointId::parse(&uri).unwrap();
            prop_assert_eq!(EndpointId::parse(&eid.to_string()).unwrap(), eid);
        }
    }
}
