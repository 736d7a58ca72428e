#![cfg(test)]

use std::sync::Mutex;

use crate::eval::{DiagnosticEvent, DiagnosticRecorder};
use crate::gate::{Gate, GateHierarchy, GateId};
use crate::store::Store;

pub const TEST_GATES: &str = r#"{
    "gates": {
        "alwaysOn": {"group": "Basics"},
        "prodOnly": {
            "group": "Environments",
            "filters": [{"kind": "environment", "environments": ["Prod"]}],
            "children": {
                "prodChild": {
                    "children": {
                        "prodGrandchild": {}
                    }
                }
            }
        },
        "prodSpring": {
            "filters": [
                {"kind": "environment", "environments": "Prod"},
                {"kind": "campaign", "enabled": ["spring"]}
            ]
        },
        "rolloutNone": {"filters": [{"kind": "rollout", "exposurePercentage": 0}]},
        "rolloutHalf": {"filters": [{"kind": "rollout", "exposurePercentage": 50}]},
        "rolloutAll": {"filters": [{"kind": "rollout", "exposurePercentage": 100}]},
        "corpnetOnly": {"filters": [{"kind": "ipAddress", "allowedRange": "corpnet"}]},
        "unknownRange": {"filters": [{"kind": "ipAddress", "allowedRange": "nowhere"}]},
        "childOfProd": {"filters": [{"kind": "parent", "gate": "prodOnly"}]},
        "orphan": {"filters": [{"kind": "parent", "gate": "missingParent"}]}
    }
}"#;

pub struct TestStore {
    hierarchy: GateHierarchy,
}

impl TestStore {
    pub fn new() -> Self {
        Self::new_from_json_str(TEST_GATES)
    }

    pub fn new_from_json_str(json: &str) -> Self {
        Self {
            hierarchy: GateHierarchy::load(json).unwrap(),
        }
    }
}

impl Store for TestStore {
    fn gate(&self, gate_name: &str) -> Option<&Gate> {
        self.hierarchy.gate(gate_name)
    }

    fn gate_by_id(&self, id: GateId) -> Option<&Gate> {
        self.hierarchy.gate_by_id(id)
    }

    fn gate_count(&self) -> usize {
        self.hierarchy.gate_count()
    }
}

pub struct InMemoryDiagnosticRecorder {
    events: Mutex<Vec<DiagnosticEvent>>,
}

impl InMemoryDiagnosticRecorder {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<DiagnosticEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl DiagnosticRecorder for InMemoryDiagnosticRecorder {
    fn record(&self, event: DiagnosticEvent) {
        self.events.lock().unwrap().push(event);
    }
}
