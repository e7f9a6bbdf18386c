//! Query trace: a flat list of events linked into a tree by `parent_id`.
//! Root events are their own parent.

use std::collections::BTreeMap;

use serde::Serialize;

pub type TraceId = u64;

/// A goal as source text, serialised as `{"polar": "..."}`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GoalText {
    pub polar: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event_type")]
pub enum TraceEvent {
    ExecuteGoal {
        id: TraceId,
        parent_id: TraceId,
        goal: GoalText,
    },
    EvaluateRule {
        id: TraceId,
        parent_id: TraceId,
        rule: String,
    },
    ChoicePush {
        id: TraceId,
        parent_id: TraceId,
        alternatives: usize,
    },
    /// Resumed a choice point with its next alternative.
    ExecuteChoice {
        id: TraceId,
        parent_id: TraceId,
    },
    /// Variables bound by the preceding goal.
    Bindings {
        id: TraceId,
        parent_id: TraceId,
        bindings: BTreeMap<String, String>,
    },
    Backtrack {
        id: TraceId,
        parent_id: TraceId,
        reason: String,
    },
    Result {
        id: TraceId,
        parent_id: TraceId,
        bindings: BTreeMap<String, String>,
    },
    Done {
        id: TraceId,
        parent_id: TraceId,
    },
}

impl TraceEvent {
    pub fn id(&self) -> TraceId {
        match self {
            TraceEvent::ExecuteGoal { id, .. }
            | TraceEvent::EvaluateRule { id, .. }
            | TraceEvent::ChoicePush { id, .. }
            | TraceEvent::ExecuteChoice { id, .. }
            | TraceEvent::Bindings { id, .. }
            | TraceEvent::Backtrack { id, .. }
            | TraceEvent::Result { id, .. }
            | TraceEvent::Done { id, .. } => *id,
        }
    }

    pub fn parent_id(&self) -> TraceId {
        match self {
            TraceEvent::ExecuteGoal { parent_id, .. }
            | TraceEvent::EvaluateRule { parent_id, .. }
            | TraceEvent::ChoicePush { parent_id, .. }
            | TraceEvent::ExecuteChoice { parent_id, .. }
            | TraceEvent::Bindings { parent_id, .. }
            | TraceEvent::Backtrack { parent_id, .. }
            | TraceEvent::Result { parent_id, .. }
            | TraceEvent::Done { parent_id, .. } => *parent_id,
        }
    }
}

/// Records trace events when enabled; every method is a no-op otherwise.
#[derive(Debug, Default)]
pub struct Tracer {
    enabled: bool,
    events: Vec<TraceEvent>,
    next_id: TraceId,
    /// Rule evaluations enclosing the current goal.
    stack: Vec<TraceId>,
    /// Most recent `ExecuteGoal`.
    last_goal: TraceId,
}

impl Tracer {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            ..Default::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    /// Allocates an id and its parent.
    fn ids(&mut self) -> (TraceId, TraceId) {
        self.next_id += 1;
        let id = self.next_id;
        (id, self.stack.last().copied().unwrap_or(id))
    }

    pub fn execute_goal(&mut self, goal: impl FnOnce() -> String) {
        if self.enabled {
            let (id, parent_id) = self.ids();
            self.events.push(TraceEvent::ExecuteGoal {
                id,
                parent_id,
                goal: GoalText { polar: goal() },
            });
            self.last_goal = id;
        }
    }

    pub fn last_goal(&self) -> TraceId {
        self.last_goal
    }

    /// Starts a rule evaluation under the goal that dispatched it; goals
    /// recorded until [`Tracer::pop_rule`] are its children.
    pub fn push_rule(&mut self, rule: &str, parent_id: TraceId) {
        if self.enabled {
            self.next_id += 1;
            let id = self.next_id;
            self.events.push(TraceEvent::EvaluateRule {
                id,
                parent_id,
                rule: rule.to_string(),
            });
            self.stack.push(id);
        }
    }

    pub fn pop_rule(&mut self) {
        if self.enabled {
            self.stack.pop();
        }
    }

    pub fn choice_push(&mut self, alternatives: usize) {
        if self.enabled {
            let (id, parent_id) = self.ids();
            self.events.push(TraceEvent::ChoicePush {
                id,
                parent_id,
                alternatives,
            });
        }
    }

    pub fn execute_choice(&mut self) {
        if self.enabled {
            let (id, parent_id) = self.ids();
            self.events.push(TraceEvent::ExecuteChoice { id, parent_id });
        }
    }

    pub fn bindings(&mut self, bindings: BTreeMap<String, String>) {
        if self.enabled {
            let (id, parent_id) = self.ids();
            self.events.push(TraceEvent::Bindings {
                id,
                parent_id,
                bindings,
            });
        }
    }

    pub fn backtrack(&mut self, reason: &str) {
        if self.enabled {
            let (id, parent_id) = self.ids();
            self.events.push(TraceEvent::Backtrack {
                id,
                parent_id,
                reason: reason.to_string(),
            });
        }
    }

    pub fn result(&mut self, bindings: BTreeMap<String, String>) {
        if self.enabled {
            let (id, parent_id) = self.ids();
            self.events.push(TraceEvent::Result {
                id,
                parent_id,
                bindings,
            });
        }
    }

    pub fn done(&mut self) {
        if self.enabled {
            let (id, parent_id) = self.ids();
            self.events.push(TraceEvent::Done { id, parent_id });
        }
    }

    pub fn stack(&self) -> Vec<TraceId> {
        self.stack.clone()
    }

    pub fn restore_stack(&mut self, stack: Vec<TraceId>) {
        self.stack = stack;
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.events)
    }
}
