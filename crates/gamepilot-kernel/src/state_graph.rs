//! [`StateGraph`] – the static model of the application.
//!
//! Two relations over the same set of states:
//!
//! - the **hierarchy** (`parent`), a tree rooted at the designated root that
//!   says which screen is a more specific version of which;
//! - the **transitions**, a directed and possibly cyclic graph of input
//!   recipes that move the client from one screen to another.
//!
//! The graph is assembled with [`StateGraphBuilder`] and validated once in
//! [`StateGraphBuilder::build`]; afterwards it is immutable and only offers
//! lookups.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::time::Duration;

use gamepilot_perception::TemplateRegistry;
use gamepilot_types::{ActionRecipe, PilotError, StateId, TemplateKey};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Default arrival timeout of a transition.
pub const DEFAULT_TRANSITION_TIMEOUT: Duration = Duration::from_secs(5);

// ────────────────────────────────────────────────────────────────────────────
// Definitions
// ────────────────────────────────────────────────────────────────────────────

/// How many of a state's signatures must be accepted for the state to be
/// recognized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SignaturePolicy {
    /// Every signature must be accepted.
    #[default]
    All,
    /// At least `min_accepted` signatures must be accepted.
    Quorum { min_accepted: usize },
}

impl SignaturePolicy {
    pub fn is_satisfied(&self, accepted: usize, total: usize) -> bool {
        match self {
            SignaturePolicy::All => total > 0 && accepted == total,
            SignaturePolicy::Quorum { min_accepted } => accepted >= (*min_accepted).max(1),
        }
    }
}

/// One named application state.
#[derive(Debug, Clone, PartialEq)]
pub struct StateDef {
    pub id: StateId,
    /// `None` on a non-root state means "child of the root".
    pub parent: Option<StateId>,
    pub signatures: Vec<TemplateKey>,
    pub policy: SignaturePolicy,
}

impl StateDef {
    pub fn new(id: impl Into<StateId>) -> Self {
        Self {
            id: id.into(),
            parent: None,
            signatures: Vec::new(),
            policy: SignaturePolicy::All,
        }
    }

    pub fn with_parent(mut self, parent: impl Into<StateId>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn with_signature(mut self, key: TemplateKey) -> Self {
        self.signatures.push(key);
        self
    }

    pub fn with_policy(mut self, policy: SignaturePolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// Dense index of a transition inside its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransitionId(pub usize);

impl fmt::Display for TransitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// A directed edge between two states, driven by one recipe.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub id: TransitionId,
    pub from: StateId,
    pub to: StateId,
    pub recipe: ActionRecipe,
    pub cost: u32,
    /// How long to wait for the target state before declaring a timeout.
    pub timeout: Duration,
}

impl Transition {
    /// `"from -> to"`.
    pub fn label(&self) -> String {
        format!("{} -> {}", self.from, self.to)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Builder
// ────────────────────────────────────────────────────────────────────────────

/// Collects states and transitions, then validates them into a
/// [`StateGraph`].
///
/// # Example
///
/// ```
/// use gamepilot_kernel::state_graph::{StateDef, StateGraphBuilder};
/// use gamepilot_perception::{Template, TemplateRegistry};
/// use gamepilot_types::{ActionRecipe, MatchMethod, TemplateKey};
///
/// let mut registry = TemplateRegistry::new();
/// for name in ["home_logo", "shop_banner"] {
///     let key = TemplateKey::new("ui", name);
///     registry
///         .register(Template::from_rgb(key, 1, 1, &[0, 0, 0], MatchMethod::Exact, 0.9).unwrap())
///         .unwrap();
/// }
///
/// let graph = StateGraphBuilder::new("home")
///     .state(StateDef::new("home").with_signature(TemplateKey::new("ui", "home_logo")))
///     .state(StateDef::new("shop").with_signature(TemplateKey::new("ui", "shop_banner")))
///     .transition("home", "shop", ActionRecipe::tap("open_shop", 10, 10))
///     .transition("shop", "home", ActionRecipe::tap("back", 1, 1))
///     .build(&registry)
///     .unwrap();
///
/// assert_eq!(graph.depth(&"shop".into()), Some(1));
/// ```
#[derive(Debug, Clone)]
pub struct StateGraphBuilder {
    root: StateId,
    anchor: Option<StateId>,
    states: Vec<StateDef>,
    transitions: Vec<(StateId, StateId, ActionRecipe, u32, Duration)>,
}

impl StateGraphBuilder {
    pub fn new(root: impl Into<StateId>) -> Self {
        Self {
            root: root.into(),
            anchor: None,
            states: Vec::new(),
            transitions: Vec::new(),
        }
    }

    /// The known-safe state recovery returns to.  Defaults to the root.
    pub fn anchor(mut self, anchor: impl Into<StateId>) -> Self {
        self.anchor = Some(anchor.into());
        self
    }

    pub fn state(mut self, state: StateDef) -> Self {
        self.states.push(state);
        self
    }

    /// Transition with the default cost (1) and timeout.
    pub fn transition(
        self,
        from: impl Into<StateId>,
        to: impl Into<StateId>,
        recipe: ActionRecipe,
    ) -> Self {
        self.weighted_transition(from, to, recipe, 1, DEFAULT_TRANSITION_TIMEOUT)
    }

    pub fn weighted_transition(
        mut self,
        from: impl Into<StateId>,
        to: impl Into<StateId>,
        recipe: ActionRecipe,
        cost: u32,
        timeout: Duration,
    ) -> Self {
        self.transitions
            .push((from.into(), to.into(), recipe, cost, timeout));
        self
    }

    /// Validate and freeze the graph.
    ///
    /// # Errors
    ///
    /// [`PilotError::Model`] describing the first violated rule: missing
    /// root, duplicate state, unknown or cyclic parent, transition to or from
    /// an unknown state, zero timeout, state unreachable from the root,
    /// state without signatures, signature missing from `registry`, or
    /// unknown anchor.
    pub fn build(self, registry: &TemplateRegistry) -> Result<StateGraph, PilotError> {
        let model = |msg: String| PilotError::Model(msg);

        let mut index = HashMap::with_capacity(self.states.len());
        for (i, state) in self.states.iter().enumerate() {
            if index.insert(state.id.clone(), i).is_some() {
                return Err(model(format!("duplicate state '{}'", state.id)));
            }
        }
        let Some(&root_index) = index.get(&self.root) else {
            return Err(model(format!("root state '{}' is not declared", self.root)));
        };

        // Hierarchy.
        let mut states = self.states;
        for state in &mut states {
            if state.id == self.root {
                if let Some(parent) = &state.parent {
                    return Err(model(format!("root '{}' cannot have parent '{parent}'", state.id)));
                }
                continue;
            }
            let parent = state.parent.get_or_insert_with(|| self.root.clone());
            if !index.contains_key(parent) {
                return Err(model(format!(
                    "state '{}' has unknown parent '{parent}'",
                    state.id
                )));
            }
        }
        let mut depth = vec![0usize; states.len()];
        for (i, state) in states.iter().enumerate() {
            let mut current = i;
            let mut steps = 0;
            while current != root_index {
                let Some(parent) = &states[current].parent else {
                    break;
                };
                current = index[parent];
                steps += 1;
                if steps > states.len() {
                    return Err(model(format!("parent chain of '{}' is cyclic", state.id)));
                }
            }
            depth[i] = steps;
        }

        // Signatures.
        for state in &states {
            if state.signatures.is_empty() {
                return Err(model(format!("state '{}' has no signature templates", state.id)));
            }
            if let Some(missing) = state.signatures.iter().find(|k| !registry.contains(k)) {
                return Err(model(format!(
                    "state '{}' references unknown template '{missing}'",
                    state.id
                )));
            }
            if let SignaturePolicy::Quorum { min_accepted } = state.policy {
                if min_accepted == 0 || min_accepted > state.signatures.len() {
                    return Err(model(format!(
                        "state '{}' quorum {min_accepted} outside 1..={}",
                        state.id,
                        state.signatures.len()
                    )));
                }
            }
        }
        let referenced: HashSet<&TemplateKey> = states
            .iter()
            .flat_map(|s| s.signatures.iter())
            .chain(self.transitions.iter().flat_map(|t| t.2.target_templates()))
            .collect();
        for key in registry.keys().filter(|k| !referenced.contains(k)) {
            warn!(template = %key, "template is not a signature of any state");
        }

        // Transitions.
        let mut transitions = Vec::with_capacity(self.transitions.len());
        let mut outgoing = vec![Vec::new(); states.len()];
        for (i, (from, to, recipe, cost, timeout)) in self.transitions.into_iter().enumerate() {
            let Some(&from_index) = index.get(&from) else {
                return Err(model(format!("transition from unknown state '{from}'")));
            };
            if !index.contains_key(&to) {
                return Err(model(format!("transition to unknown state '{to}'")));
            }
            if timeout.is_zero() {
                return Err(model(format!("transition {from} -> {to} has a zero timeout")));
            }
            if let Some(missing) = recipe.target_templates().find(|k| !registry.contains(k)) {
                return Err(model(format!(
                    "transition {from} -> {to} taps unknown template '{missing}'"
                )));
            }
            let id = TransitionId(i);
            outgoing[from_index].push(id);
            transitions.push(Transition {
                id,
                from,
                to,
                recipe,
                cost,
                timeout,
            });
        }

        // Reachability from the root.
        let mut seen = vec![false; states.len()];
        let mut queue = VecDeque::from([root_index]);
        seen[root_index] = true;
        while let Some(current) = queue.pop_front() {
            for id in &outgoing[current] {
                let next = index[&transitions[id.0].to];
                if !seen[next] {
                    seen[next] = true;
                    queue.push_back(next);
                }
            }
        }
        if let Some(i) = seen.iter().position(|s| !s) {
            return Err(model(format!(
                "state '{}' is unreachable from root '{}'",
                states[i].id, self.root
            )));
        }

        let anchor = self.anchor.unwrap_or_else(|| self.root.clone());
        if !index.contains_key(&anchor) {
            return Err(model(format!("anchor state '{anchor}' is not declared")));
        }

        info!(
            states = states.len(),
            transitions = transitions.len(),
            root = %self.root,
            anchor = %anchor,
            "state graph loaded"
        );
        Ok(StateGraph {
            root: self.root,
            anchor,
            states,
            index,
            depth,
            transitions,
            outgoing,
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// StateGraph
// ────────────────────────────────────────────────────────────────────────────

/// Validated, immutable state model.
#[derive(Debug, Clone)]
pub struct StateGraph {
    root: StateId,
    anchor: StateId,
    states: Vec<StateDef>,
    index: HashMap<StateId, usize>,
    depth: Vec<usize>,
    transitions: Vec<Transition>,
    outgoing: Vec<Vec<TransitionId>>,
}

impl StateGraph {
    pub fn root(&self) -> &StateId {
        &self.root
    }

    pub fn anchor(&self) -> &StateId {
        &self.anchor
    }

    pub fn contains(&self, state: &StateId) -> bool {
        self.index.contains_key(state)
    }

    pub fn state(&self, state: &StateId) -> Option<&StateDef> {
        self.index.get(state).map(|&i| &self.states[i])
    }

    /// States in declaration order.
    pub fn states(&self) -> impl Iterator<Item = &StateDef> {
        self.states.iter()
    }

    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    /// Position of `state` in declaration order.
    pub fn declaration_index(&self, state: &StateId) -> Option<usize> {
        self.index.get(state).copied()
    }

    pub fn signatures_for(&self, state: &StateId) -> Option<&[TemplateKey]> {
        self.state(state).map(|s| s.signatures.as_slice())
    }

    pub fn policy_for(&self, state: &StateId) -> Option<SignaturePolicy> {
        self.state(state).map(|s| s.policy)
    }

    pub fn parent_of(&self, state: &StateId) -> Option<&StateId> {
        self.state(state).and_then(|s| s.parent.as_ref())
    }

    /// Parent, grandparent, … up to and including the root.
    pub fn ancestors(&self, state: &StateId) -> Vec<&StateId> {
        let mut chain = Vec::new();
        let mut current = self.parent_of(state);
        while let Some(parent) = current {
            chain.push(parent);
            current = self.parent_of(parent);
        }
        chain
    }

    /// Hierarchy depth; the root is 0.
    pub fn depth(&self, state: &StateId) -> Option<usize> {
        self.index.get(state).map(|&i| self.depth[i])
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    pub fn transition(&self, id: TransitionId) -> Option<&Transition> {
        self.transitions.get(id.0)
    }

    /// Outgoing transitions in declaration order.
    pub fn transitions_from(&self, state: &StateId) -> impl Iterator<Item = &Transition> {
        self.index
            .get(state)
            .map(|&i| self.outgoing[i].as_slice())
            .unwrap_or_default()
            .iter()
            .map(|id| &self.transitions[id.0])
    }

    /// States within `hops` outgoing transitions of `state`, including
    /// `state` itself, in declaration order.  Empty for an unknown state.
    pub fn neighborhood(&self, state: &StateId, hops: usize) -> Vec<&StateId> {
        let Some(&start) = self.index.get(state) else {
            return Vec::new();
        };
        let mut seen = vec![false; self.states.len()];
        seen[start] = true;
        let mut frontier = vec![start];
        for _ in 0..hops {
            let mut next = Vec::new();
            for current in frontier {
                for id in &self.outgoing[current] {
                    let to = self.index[&self.transitions[id.0].to];
                    if !seen[to] {
                        seen[to] = true;
                        next.push(to);
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }
        self.states
            .iter()
            .zip(seen)
            .filter(|(_, s)| *s)
            .map(|(state, _)| &state.id)
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use gamepilot_perception::Template;
    use gamepilot_types::MatchMethod;

    pub(crate) fn registry(names: &[&str]) -> TemplateRegistry {
        let mut reg = TemplateRegistry::new();
        for name in names {
            let key = TemplateKey::new("ui", *name);
            reg.register(Template::from_rgb(key, 1, 1, &[0, 0, 0], MatchMethod::Exact, 0.9).unwrap())
                .unwrap();
        }
        reg
    }

    pub(crate) fn sig(name: &str) -> TemplateKey {
        TemplateKey::new("ui", name)
    }

    /// home ⇄ shop, home → event → event_detail → home; event_detail is a
    /// child of event in the hierarchy.
    pub(crate) fn sample() -> StateGraph {
        StateGraphBuilder::new("home")
            .state(StateDef::new("home").with_signature(sig("home")))
            .state(StateDef::new("shop").with_signature(sig("shop")))
            .state(StateDef::new("event").with_signature(sig("event")))
            .state(
                StateDef::new("event_detail")
                    .with_parent("event")
                    .with_signature(sig("event"))
                    .with_signature(sig("detail")),
            )
            .transition("home", "shop", ActionRecipe::tap("open_shop", 1, 1))
            .transition("shop", "home", ActionRecipe::tap("back", 0, 0))
            .transition("home", "event", ActionRecipe::tap("open_event", 2, 2))
            .transition("event", "event_detail", ActionRecipe::tap("open_detail", 3, 3))
            .transition("event_detail", "home", ActionRecipe::tap("home_button", 4, 4))
            .build(&registry(&["home", "shop", "event", "detail"]))
            .unwrap()
    }

    #[test]
    fn lookups() {
        let g = sample();
        assert_eq!(g.root(), &StateId::from("home"));
        assert_eq!(g.anchor(), &StateId::from("home"));
        assert_eq!(g.state_count(), 4);
        assert_eq!(g.depth(&"event_detail".into()), Some(2));
        assert_eq!(g.parent_of(&"shop".into()), Some(&StateId::from("home")));
        assert_eq!(
            g.ancestors(&"event_detail".into()),
            vec![&StateId::from("event"), &StateId::from("home")]
        );
        assert_eq!(g.signatures_for(&"event_detail".into()).map(<[_]>::len), Some(2));
        assert_eq!(g.transitions_from(&"home".into()).count(), 2);
        assert_eq!(g.transitions_from(&"nowhere".into()).count(), 0);
        assert!(g.policy_for(&"nowhere".into()).is_none());
    }

    #[test]
    fn neighborhood_follows_outgoing_transitions() {
        let g = sample();
        let one: Vec<&str> = g.neighborhood(&"shop".into(), 1).iter().map(|s| s.as_str()).collect();
        assert_eq!(one, vec!["home", "shop"]);
        let two: Vec<&str> = g.neighborhood(&"shop".into(), 2).iter().map(|s| s.as_str()).collect();
        assert_eq!(two, vec!["home", "shop", "event"]);
        assert_eq!(g.neighborhood(&"home".into(), 0).len(), 1);
        assert!(g.neighborhood(&"nowhere".into(), 3).is_empty());
    }

    #[test]
    fn quorum_policy() {
        let q = SignaturePolicy::Quorum { min_accepted: 2 };
        assert!(q.is_satisfied(2, 3));
        assert!(!q.is_satisfied(1, 3));
        assert!(SignaturePolicy::All.is_satisfied(3, 3));
        assert!(!SignaturePolicy::All.is_satisfied(0, 0));
    }

    fn expect_model_error(builder: StateGraphBuilder, reg: &TemplateRegistry, needle: &str) {
        match builder.build(reg) {
            Err(PilotError::Model(msg)) => assert!(msg.contains(needle), "{msg}"),
            other => panic!("expected model error containing {needle:?}, got {other:?}"),
        }
    }

    #[test]
    fn missing_root_is_rejected() {
        let reg = registry(&["a"]);
        expect_model_error(
            StateGraphBuilder::new("home").state(StateDef::new("a").with_signature(sig("a"))),
            &reg,
            "root",
        );
    }

    #[test]
    fn duplicate_state_is_rejected() {
        let reg = registry(&["a"]);
        expect_model_error(
            StateGraphBuilder::new("a")
                .state(StateDef::new("a").with_signature(sig("a")))
                .state(StateDef::new("a").with_signature(sig("a"))),
            &reg,
            "duplicate",
        );
    }

    #[test]
    fn cyclic_parent_chain_is_rejected() {
        let reg = registry(&["a"]);
        expect_model_error(
            StateGraphBuilder::new("root")
                .state(StateDef::new("root").with_signature(sig("a")))
                .state(StateDef::new("x").with_parent("y").with_signature(sig("a")))
                .state(StateDef::new("y").with_parent("x").with_signature(sig("a"))),
            &reg,
            "cyclic",
        );
    }

    #[test]
    fn unknown_transition_endpoint_is_rejected() {
        let reg = registry(&["a"]);
        expect_model_error(
            StateGraphBuilder::new("a")
                .state(StateDef::new("a").with_signature(sig("a")))
                .transition("a", "ghost", ActionRecipe::tap("t", 0, 0)),
            &reg,
            "ghost",
        );
    }

    #[test]
    fn tap_on_unregistered_template_is_rejected() {
        let reg = registry(&["a", "b"]);
        expect_model_error(
            StateGraphBuilder::new("a")
                .state(StateDef::new("a").with_signature(sig("a")))
                .state(StateDef::new("b").with_signature(sig("b")))
                .transition("a", "b", ActionRecipe::tap_template("t", sig("button"))),
            &reg,
            "ui/button",
        );
        let reg = registry(&["a", "b", "button"]);
        StateGraphBuilder::new("a")
            .state(StateDef::new("a").with_signature(sig("a")))
            .state(StateDef::new("b").with_signature(sig("b")))
            .transition("a", "b", ActionRecipe::tap_template("t", sig("button")))
            .build(&reg)
            .unwrap();
    }

    #[test]
    fn unreachable_state_is_rejected() {
        let reg = registry(&["a", "b"]);
        expect_model_error(
            StateGraphBuilder::new("a")
                .state(StateDef::new("a").with_signature(sig("a")))
                .state(StateDef::new("b").with_signature(sig("b")))
                .transition("b", "a", ActionRecipe::tap("t", 0, 0)),
            &reg,
            "unreachable",
        );
    }

    #[test]
    fn orphan_signature_is_rejected() {
        let reg = registry(&["a"]);
        expect_model_error(
            StateGraphBuilder::new("a").state(StateDef::new("a").with_signature(sig("missing"))),
            &reg,
            "unknown template",
        );
    }

    #[test]
    fn unknown_anchor_is_rejected() {
        let reg = registry(&["a"]);
        expect_model_error(
            StateGraphBuilder::new("a")
                .anchor("lobby")
                .state(StateDef::new("a").with_signature(sig("a"))),
            &reg,
            "anchor",
        );
    }

    #[test]
    fn state_without_signatures_is_rejected() {
        let reg = registry(&["a"]);
        expect_model_error(StateGraphBuilder::new("a").state(StateDef::new("a")), &reg, "no signature");
    }
}
