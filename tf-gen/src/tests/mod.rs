mod builder_test;
mod context_test;
mod simulation_test;

use rstest::*;

use crate::builder::{
    build_net,
    BuiltNet,
};
use crate::model::GraphRecord;

/// Parse a JSON graph description.
pub fn records(json: &str) -> Vec<GraphRecord> {
    serde_json::from_str(json).unwrap()
}

/// Parse and build a JSON graph description.
pub fn net_from(json: &str) -> BuiltNet {
    build_net(&records(json)).unwrap()
}

/// `start -> A -> p2 -> B -> p3 -> C -> end`, one token in `start`.
pub const SEQUENTIAL: &str = r#"[
    {"type": "Place", "id": "p1", "name": "start", "tokens": 1},
    {"type": "Place", "id": "p2", "name": "p2"},
    {"type": "Place", "id": "p3", "name": "p3"},
    {"type": "Place", "id": "p4", "name": "end"},
    {"type": "Transition", "id": "t1", "name": "A", "exectime": 60},
    {"type": "Transition", "id": "t2", "name": "B", "exectime": "120"},
    {"type": "Transition", "id": "t3", "name": "C", "exectime": 30},
    {"type": "Link", "source": "p1", "target": "t1"},
    {"type": "Link", "source": "t1", "target": "p2"},
    {"type": "Link", "source": "p2", "target": "t2"},
    {"type": "Link", "source": "t2", "target": "p3"},
    {"type": "Link", "source": "p3", "target": "t3"},
    {"type": "Link", "source": "t3", "target": "p4"}
]"#;

/// `start` feeds both `left` (weight 1) and `right` (weight 3), each ending in `end`.
pub const CHOICE: &str = r#"[
    {"type": "Place", "id": "p1", "name": "start", "tokens": 1},
    {"type": "Place", "id": "p2", "name": "end"},
    {"type": "Transition", "id": "t1", "name": "left", "exectime": 10},
    {"type": "Transition", "id": "t2", "name": "right", "exectime": 10},
    {"type": "Link", "source": "p1", "target": "t1", "prob": 1},
    {"type": "Link", "source": "p1", "target": "t2", "prob": 3},
    {"type": "Link", "source": "t1", "target": "p2"},
    {"type": "Link", "source": "t2", "target": "p2"}
]"#;

#[fixture]
pub fn sequential() -> BuiltNet {
    net_from(SEQUENTIAL)
}

#[fixture]
pub fn choice() -> BuiltNet {
    net_from(CHOICE)
}
