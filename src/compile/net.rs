//! EP-023: Compile service wire types and the remote client.
//!
//! Byte fields travel as standard padded base64, matching existing
//! compile servers. The proxy endpoint carries bytecode as hex.

use super::Artifact;
use crate::error::{EpmError, Result};
use crate::transport::http;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;

mod b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let text: Option<String> = Option::deserialize(d)?;
        match text {
            Some(t) => STANDARD.decode(t).map_err(serde::de::Error::custom),
            None => Ok(Vec::new()),
        }
    }
}

mod b64_map {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use indexmap::IndexMap;
    use serde::ser::SerializeMap;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(map: &IndexMap<String, Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        let mut m = s.serialize_map(Some(map.len()))?;
        for (k, v) in map {
            m.serialize_entry(k, &STANDARD.encode(v))?;
        }
        m.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<IndexMap<String, Vec<u8>>, D::Error> {
        let raw: Option<IndexMap<String, String>> = Option::deserialize(d)?;
        raw.unwrap_or_default()
            .into_iter()
            .map(|(k, v)| {
                STANDARD
                    .decode(v)
                    .map(|b| (k, b))
                    .map_err(serde::de::Error::custom)
            })
            .collect()
    }
}

/// `POST /compile` body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub name: String,
    pub language: String,
    #[serde(with = "b64", default)]
    pub script: Vec<u8>,
    #[serde(with = "b64_map", default)]
    pub includes: IndexMap<String, Vec<u8>>,
}

/// `POST /compile` reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    #[serde(with = "b64", default)]
    pub bytecode: Vec<u8>,
    #[serde(default)]
    pub abi: String,
    #[serde(default)]
    pub error: String,
}

impl Response {
    pub fn ok(artifact: Artifact) -> Self {
        Response {
            bytecode: artifact.bytecode,
            abi: artifact.abi,
            error: String::new(),
        }
    }

    pub fn err(message: impl std::fmt::Display) -> Self {
        Response {
            error: message.to_string(),
            ..Response::default()
        }
    }

    /// Non-empty `error` becomes a compile failure with no bytecode.
    pub fn into_artifact(self) -> Result<Artifact> {
        if !self.error.is_empty() {
            return Err(EpmError::CompilerFailed(self.error));
        }
        Ok(Artifact {
            bytecode: self.bytecode,
            abi: self.abi,
        })
    }
}

/// `POST /compile2` reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HexResponse {
    pub bytecode: String,
}

/// `POST /` (proxy) body: `source` is a path unless `literal` is set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyRequest {
    pub source: String,
    #[serde(default)]
    pub literal: bool,
    #[serde(default)]
    pub language: String,
}

/// `POST /` (proxy) reply with hex bytecode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyResponse {
    #[serde(default)]
    pub bytecode: String,
    #[serde(default)]
    pub abi: String,
    #[serde(default)]
    pub error: String,
}

impl ProxyResponse {
    pub fn from_result(result: Result<Artifact>) -> Self {
        match result {
            Ok(a) => ProxyResponse {
                bytecode: hex::encode(a.bytecode),
                abi: a.abi,
                error: String::new(),
            },
            Err(e) => ProxyResponse {
                error: e.to_string(),
                ..ProxyResponse::default()
            },
        }
    }
}

/// Send a compile request to a remote server.
pub fn request_remote(url: &str, req: &Request, timeout: Duration) -> Result<Response> {
    http::post_json(url, req, timeout).map_err(|message| EpmError::Remote {
        url: url.to_string(),
        message,
    })
}
