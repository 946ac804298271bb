//! Typed service path building.
//!
//! A handle represents one slash-delimited service path under the services
//! root. Child handles are manifested on first access and memoized for the
//! lifetime of the parent, so repeated lookups of the same name hand back
//! the same handle. None of this touches the network: verbs only describe
//! a call, encoded as a [`CallRequest`], and leave dispatch to the
//! transport.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;

/// HTTP method selected by the verb convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

/// Per-call options: HTTP method and URL scheme.
#[derive(Debug, Clone)]
pub struct CallOptions {
    pub method: Method,
    pub protocol: String,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            method: Method::Get,
            protocol: "http".to_string(),
        }
    }
}

impl CallOptions {
    pub fn method(method: Method) -> Self {
        Self {
            method,
            ..Default::default()
        }
    }
}

/// A described, not-yet-dispatched service call.
///
/// `base_path` is the service path hosts are resolved under; `path` is the
/// suffix the call is issued against on whichever host answers.
#[derive(Debug, Clone)]
pub struct CallRequest {
    pub base_path: String,
    pub path: String,
    pub body: Value,
    pub options: CallOptions,
}

/// A handle on one service path.
///
/// Verb conventions: `create` is POST, `get`/`find` are GET, and
/// [`call`](Self::call) appends an arbitrary trailing verb segment with GET
/// semantics unless overridden. [`context`](Self::context) fixes identifier
/// segments and unlocks `update`/`delete`.
pub struct ServiceHandle {
    path: String,
    children: Mutex<HashMap<String, Arc<ServiceHandle>>>,
}

impl ServiceHandle {
    /// Creates the root handle for a services namespace, e.g. `/services`.
    pub fn root(path: impl AsRef<str>) -> Arc<Self> {
        Arc::new(Self::at(format!("/{}", path.as_ref().trim_matches('/'))))
    }

    fn at(path: String) -> Self {
        Self {
            path,
            children: Mutex::new(HashMap::new()),
        }
    }

    /// This handle's full slash-delimited path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The child handle for `name`, manifested once and memoized.
    ///
    /// Dotted names extend the path by several segments: `internal.user`
    /// becomes `<path>/internal/user`.
    pub fn child(self: &Arc<Self>, name: &str) -> Arc<ServiceHandle> {
        let segments = name.trim_matches('/').replace('.', "/");
        let mut children = self.children.lock().unwrap();
        children
            .entry(segments.clone())
            .or_insert_with(|| Arc::new(Self::at(format!("{}/{}", self.path, segments))))
            .clone()
    }

    /// A contextual handle with the given identifiers fixed as a suffix.
    pub fn context<I>(self: &Arc<Self>, ids: I) -> ServiceContext
    where
        I: IntoIterator,
        I::Item: ToString,
    {
        let context = ids
            .into_iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join("/");
        ServiceContext {
            service: Arc::clone(self),
            context,
        }
    }

    /// Describes a creation call: POST with `attrs` as the body.
    pub fn create(&self, attrs: Value) -> CallRequest {
        self.request("", attrs, CallOptions::method(Method::Post))
    }

    /// Describes a read call: GET with `attrs` as the query string.
    pub fn get(&self, attrs: Value) -> CallRequest {
        self.request("", attrs, CallOptions::default())
    }

    /// Describes a single-entity read: GET with `id` as a path segment.
    pub fn find(&self, id: &str, attrs: Value) -> CallRequest {
        self.request(id, attrs, CallOptions::default())
    }

    /// Describes a generic call with `verb` as the trailing path segment.
    pub fn call(&self, verb: &str, attrs: Value, options: CallOptions) -> CallRequest {
        self.request(verb, attrs, options)
    }

    fn request(&self, suffix: &str, body: Value, options: CallOptions) -> CallRequest {
        let suffix = suffix.trim_matches('/');
        let path = if suffix.is_empty() {
            "/".to_string()
        } else {
            format!("/{}", suffix)
        };
        CallRequest {
            base_path: self.path.clone(),
            path,
            body,
            options,
        }
    }
}

/// A service handle with identifier segments fixed as a path suffix.
pub struct ServiceContext {
    service: Arc<ServiceHandle>,
    context: String,
}

impl ServiceContext {
    /// The full path including the fixed context.
    pub fn path(&self) -> String {
        format!("{}/{}", self.service.path(), self.context)
    }

    /// Describes an update of the context entity: PUT with `attrs` as body.
    pub fn update(&self, attrs: Value) -> CallRequest {
        self.service
            .request(&self.context, attrs, CallOptions::method(Method::Put))
    }

    /// Describes a deletion of the context entity.
    pub fn delete(&self, attrs: Value) -> CallRequest {
        self.service
            .request(&self.context, attrs, CallOptions::method(Method::Delete))
    }

    /// Describes a read against the context entity.
    pub fn get(&self, attrs: Value) -> CallRequest {
        self.service.request(&self.context, attrs, CallOptions::default())
    }

    /// Describes a generic call with `verb` appended after the context.
    pub fn call(&self, verb: &str, attrs: Value, options: CallOptions) -> CallRequest {
        let suffix = format!("{}/{}", self.context, verb.trim_matches('/'));
        self.service.request(&suffix, attrs, options)
    }
}
