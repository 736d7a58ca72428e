use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use log::warn;
use serde::Deserialize;
use serde_with::{serde_as, Map};

use crate::error::ConfigurationError;
use crate::filter::Filter;
use crate::rollout::BUCKET_COUNT;
use crate::store::Store;
use crate::util::{is_valid_gate_name, normalize_key};

/// Index of a gate inside a [GateHierarchy].
pub type GateId = usize;

const PATH_SEPARATOR: char = '/';

/// The source form of a gate hierarchy document.
///
/// ```json
/// { "gates": { "checkout": { "filters": [...], "children": { "checkoutV2": {...} } } } }
/// ```
///
/// Gates are JSON objects keyed by name. They are read as ordered pairs rather than maps so that
/// duplicate keys are reported instead of silently overwriting each other.
#[serde_as]
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GateDocument {
    #[serde_as(as = "Map<_, _>")]
    #[serde(default)]
    pub gates: Vec<(String, GateDefinition)>,
}

#[serde_as]
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GateDefinition {
    /// Presentation grouping only; never consulted during evaluation.
    #[serde(default, alias = "groupName")]
    pub group: Option<String>,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde_as(as = "Map<_, _>")]
    #[serde(default)]
    pub children: Vec<(String, GateDefinition)>,
}

/// A gate inside a loaded snapshot.
#[derive(Clone, Debug, PartialEq)]
pub struct Gate {
    id: GateId,
    name: String,
    path: String,
    group: Option<String>,
    pub(crate) filters: Vec<Filter>,
    pub(crate) container: Option<GateId>,
    children: Vec<GateId>,
}

impl Gate {
    pub fn id(&self) -> GateId {
        self.id
    }

    /// The gate's name as written in the document.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Names from the root down to this gate, separated by `/`.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    /// The gate this one is nested in. A nested gate is never active while its container is
    /// inactive.
    pub fn container(&self) -> Option<GateId> {
        self.container
    }

    pub fn children(&self) -> &[GateId] {
        &self.children
    }
}

/// An immutable, fully validated gate hierarchy.
///
/// Gates are stored in breadth-first order, so ids of containers are always lower than ids of
/// the gates they contain. Name lookup ignores case; if the same name appears at several depths
/// the shallowest (then earliest) gate is the one found by name.
#[derive(Clone, Debug)]
pub struct GateHierarchy {
    gates: Vec<Gate>,
    roots: Vec<GateId>,
    index: HashMap<String, GateId>,
    version: u64,
    loaded_at: DateTime<Utc>,
}

impl GateHierarchy {
    /// Parses and validates a JSON gate document.
    pub fn load(json: &str) -> Result<Self, ConfigurationError> {
        let document: GateDocument = serde_json::from_str(json)?;
        Self::from_document(document)
    }

    /// Validates an already parsed document and flattens it into a snapshot.
    pub fn from_document(document: GateDocument) -> Result<Self, ConfigurationError> {
        let mut hierarchy = GateHierarchy::empty();
        let mut queue: VecDeque<(String, GateDefinition, Option<GateId>, String)> =
            VecDeque::new();

        enqueue_siblings(&mut queue, document.gates, None, "")?;

        while let Some((name, definition, container, path)) = queue.pop_front() {
            validate_filters(&definition, &path)?;

            let id = hierarchy.gates.len();
            let key = normalize_key(&name);
            match hierarchy.index.get(&key) {
                Some(existing) => warn!(
                    "gate '{}' is shadowed by '{}' for lookups by name",
                    path, hierarchy.gates[*existing].path
                ),
                None => {
                    hierarchy.index.insert(key, id);
                }
            }

            match container {
                Some(container_id) => hierarchy.gates[container_id].children.push(id),
                None => hierarchy.roots.push(id),
            }

            enqueue_siblings(&mut queue, definition.children, Some(id), &path)?;

            hierarchy.gates.push(Gate {
                id,
                name,
                path,
                group: definition.group,
                filters: definition.filters,
                container,
                children: Vec::new(),
            });
        }

        Ok(hierarchy)
    }

    /// A hierarchy with no gates, in which every lookup misses.
    pub fn empty() -> Self {
        GateHierarchy {
            gates: Vec::new(),
            roots: Vec::new(),
            index: HashMap::new(),
            version: 0,
            loaded_at: Utc::now(),
        }
    }

    /// All gates in breadth-first order.
    pub fn gates(&self) -> impl Iterator<Item = &Gate> {
        self.gates.iter()
    }

    /// The top-level gates.
    pub fn roots(&self) -> impl Iterator<Item = &Gate> {
        self.roots.iter().filter_map(|id| self.gates.get(*id))
    }

    pub fn len(&self) -> usize {
        self.gates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gates.is_empty()
    }

    /// Version assigned by the [crate::GateStore] that published this snapshot; 0 if it was
    /// never published.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    pub(crate) fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }
}

impl Store for GateHierarchy {
    fn gate(&self, gate_name: &str) -> Option<&Gate> {
        self.index
            .get(&normalize_key(gate_name))
            .and_then(|id| self.gates.get(*id))
    }

    fn gate_by_id(&self, id: GateId) -> Option<&Gate> {
        self.gates.get(id)
    }

    fn gate_count(&self) -> usize {
        self.gates.len()
    }
}

fn enqueue_siblings(
    queue: &mut VecDeque<(String, GateDefinition, Option<GateId>, String)>,
    siblings: Vec<(String, GateDefinition)>,
    container: Option<GateId>,
    container_path: &str,
) -> Result<(), ConfigurationError> {
    let mut seen = HashSet::with_capacity(siblings.len());
    for (name, definition) in siblings {
        let path = if container_path.is_empty() {
            name.clone()
        } else {
            format!("{}{}{}", container_path, PATH_SEPARATOR, name)
        };
        if !is_valid_gate_name(&name) {
            return Err(ConfigurationError::InvalidGateName { name, path });
        }
        if !seen.insert(normalize_key(&name)) {
            return Err(ConfigurationError::DuplicateGate { name, path });
        }
        queue.push_back((name, definition, container, path));
    }
    Ok(())
}

fn validate_filters(definition: &GateDefinition, path: &str) -> Result<(), ConfigurationError> {
    for filter in &definition.filters {
        if let Filter::Rollout(rollout) = filter {
            if rollout.exposure_percentage > BUCKET_COUNT {
                return Err(ConfigurationError::InvalidExposure {
                    path: path.to_string(),
                    percentage: rollout.exposure_percentage,
                });
            }
        }
    }
    Ok(())
}
