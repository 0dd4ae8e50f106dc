//! Workspace object references and their filename-safe encoding.
//!
//! A reference is the `workspace/object/version` triple used by the object
//! repository (e.g. `"67060/5/2"`). Every file the pipeline derives from a
//! repository object carries the encoded form `_w67060o5v2_` somewhere in its
//! name, so any pose or log on disk can be traced back to its inputs.
//!
//! # Example
//! ```
//! use vinaflow_common::upa::ObjectRef;
//!
//! let upa: ObjectRef = "67060/5/2".parse().unwrap();
//! assert_eq!(upa.encode(), "_w67060o5v2_");
//! assert_eq!(ObjectRef::decode("r_w67060o5v2_6wzu.pdbqt").unwrap(), upa);
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::error::{Result, VinaflowError};

/// A versioned object in the remote repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectRef {
    pub workspace_id: u64,
    pub object_id: u64,
    pub version: u64,
}

fn embedded_ref_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"_w(\d+)o(\d+)v(\d+)_").unwrap())
}

impl ObjectRef {
    pub fn new(workspace_id: u64, object_id: u64, version: u64) -> Result<Self> {
        if object_id == 0 || version == 0 {
            return Err(VinaflowError::MalformedIdentifier(format!(
                "{workspace_id}/{object_id}/{version}: object id and version must be positive"
            )));
        }
        Ok(Self { workspace_id, object_id, version })
    }

    /// Filename-safe form: `_w{ws}o{obj}v{ver}_`.
    pub fn encode(&self) -> String {
        format!("_w{}o{}v{}_", self.workspace_id, self.object_id, self.version)
    }

    /// Recover the first reference embedded anywhere in `fragment`.
    ///
    /// Surrounding text is ignored, so `"prefix_w12o34v5_.sdf.pdbqt"` decodes
    /// to `12/34/5`.
    pub fn decode(fragment: &str) -> Result<Self> {
        let caps = embedded_ref_regex().captures(fragment).ok_or_else(|| {
            VinaflowError::MalformedIdentifier(format!("no encoded reference in {fragment:?}"))
        })?;
        Self::from_captures(&caps, fragment)
    }

    /// Every reference embedded in `text`, left to right.
    pub fn decode_all(text: &str) -> Result<Vec<Self>> {
        embedded_ref_regex()
            .captures_iter(text)
            .map(|caps| Self::from_captures(&caps, text))
            .collect()
    }

    fn from_captures(caps: &Captures<'_>, source: &str) -> Result<Self> {
        let field = |i: usize| -> Result<u64> {
            caps[i].parse::<u64>().map_err(|e| {
                VinaflowError::MalformedIdentifier(format!("{source:?}: {e}"))
            })
        };
        Self::new(field(1)?, field(2)?, field(3)?)
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.workspace_id, self.object_id, self.version)
    }
}

impl FromStr for ObjectRef {
    type Err = VinaflowError;

    /// Parse a `ws/obj/ver` reference string.
    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.trim().split('/').collect();
        if parts.len() != 3 {
            return Err(VinaflowError::MalformedIdentifier(format!(
                "{s:?}: expected workspace/object/version"
            )));
        }
        let mut nums = [0u64; 3];
        for (slot, part) in nums.iter_mut().zip(&parts) {
            *slot = part.parse().map_err(|_| {
                VinaflowError::MalformedIdentifier(format!("{s:?}: {part:?} is not a number"))
            })?;
        }
        Self::new(nums[0], nums[1], nums[2])
    }
}

impl TryFrom<String> for ObjectRef {
    type Error = VinaflowError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ObjectRef> for String {
    fn from(upa: ObjectRef) -> Self {
        upa.to_string()
    }
}

/// Make a display name safe to sit next to an encoded reference in a filename.
///
/// Underscores are replaced as well, so a name can never fake an embedded
/// `_w..o..v.._` reference.
pub fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '-' })
        .collect();
    let trimmed = cleaned.trim_matches(|c| c == '-' || c == '.');
    if trimmed.is_empty() {
        "object".to_string()
    } else {
        trimmed.to_string()
    }
}
