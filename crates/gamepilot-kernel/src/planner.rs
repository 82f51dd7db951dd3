//! Minimum-cost route search over the transition graph.
//!
//! Plain Dijkstra.  Among equal-cost routes the one with fewer transitions
//! wins, then the one whose transitions were declared first, so the same
//! graph always yields the same plan.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use gamepilot_types::StateId;

use crate::state_graph::{StateGraph, TransitionId};

/// An ordered list of transitions leading to a goal, with its total cost.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NavigationPlan {
    pub steps: Vec<TransitionId>,
    pub cost: u32,
}

impl NavigationPlan {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// `"from -> to"` label of each step.
    pub fn labels(&self, graph: &StateGraph) -> Vec<String> {
        self.steps
            .iter()
            .filter_map(|id| graph.transition(*id))
            .map(|t| t.label())
            .collect()
    }
}

/// Cheapest plan from `from` to `to`, or `None` when either state is
/// unknown or no route exists.  `from == to` yields an empty plan.
pub fn plan(graph: &StateGraph, from: &StateId, to: &StateId) -> Option<NavigationPlan> {
    let start = graph.declaration_index(from)?;
    let goal = graph.declaration_index(to)?;
    if start == goal {
        return Some(NavigationPlan::default());
    }

    let n = graph.state_count();
    // (cost, hops) per state, and the transition that reached it.
    let mut best: Vec<Option<(u64, usize)>> = vec![None; n];
    let mut via: Vec<Option<TransitionId>> = vec![None; n];
    let mut heap = BinaryHeap::new();
    best[start] = Some((0, 0));
    heap.push(Reverse((0u64, 0usize, start)));

    let ids: Vec<&StateId> = graph.states().map(|s| &s.id).collect();
    while let Some(Reverse((cost, hops, current))) = heap.pop() {
        if best[current] != Some((cost, hops)) {
            continue;
        }
        if current == goal {
            break;
        }
        for transition in graph.transitions_from(ids[current]) {
            let Some(next) = graph.declaration_index(&transition.to) else {
                continue;
            };
            let candidate = (cost + transition.cost as u64, hops + 1);
            if best[next].is_none_or(|known| candidate < known) {
                best[next] = Some(candidate);
                via[next] = Some(transition.id);
                heap.push(Reverse((candidate.0, candidate.1, next)));
            }
        }
    }

    let (total, _) = best[goal]?;
    let mut steps = Vec::new();
    let mut current = goal;
    while current != start {
        let id = via[current]?;
        steps.push(id);
        current = graph.declaration_index(&graph.transition(id)?.from)?;
    }
    steps.reverse();
    Some(NavigationPlan {
        steps,
        cost: u32::try_from(total).unwrap_or(u32::MAX),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_graph::tests::{registry, sample, sig};
    use crate::state_graph::{StateDef, StateGraphBuilder};
    use gamepilot_types::ActionRecipe;
    use std::time::Duration;

    #[test]
    fn direct_route() {
        let g = sample();
        let p = plan(&g, &"home".into(), &"shop".into()).unwrap();
        assert_eq!(p.cost, 1);
        assert_eq!(p.labels(&g), vec!["home -> shop"]);
    }

    #[test]
    fn multi_hop_route() {
        let g = sample();
        let p = plan(&g, &"shop".into(), &"event_detail".into()).unwrap();
        assert_eq!(
            p.labels(&g),
            vec!["shop -> home", "home -> event", "event -> event_detail"]
        );
        assert_eq!(p.cost, 3);
    }

    #[test]
    fn same_state_is_empty_plan() {
        let g = sample();
        let p = plan(&g, &"shop".into(), &"shop".into()).unwrap();
        assert!(p.is_empty());
        assert_eq!(p.cost, 0);
    }

    #[test]
    fn unknown_state_has_no_plan() {
        let g = sample();
        assert!(plan(&g, &"home".into(), &"castle".into()).is_none());
        assert!(plan(&g, &"castle".into(), &"home".into()).is_none());
    }

    fn weighted() -> StateGraph {
        let t = Duration::from_secs(1);
        StateGraphBuilder::new("a")
            .state(StateDef::new("a").with_signature(sig("a")))
            .state(StateDef::new("b").with_signature(sig("b")))
            .state(StateDef::new("c").with_signature(sig("c")))
            .weighted_transition("a", "c", ActionRecipe::tap("a_c", 0, 0), 5, t)
            .weighted_transition("a", "b", ActionRecipe::tap("a_b", 0, 0), 1, t)
            .weighted_transition("b", "c", ActionRecipe::tap("b_c", 0, 0), 1, t)
            .build(&registry(&["a", "b", "c"]))
            .unwrap()
    }

    #[test]
    fn cheaper_detour_beats_expensive_edge() {
        let g = weighted();
        let p = plan(&g, &"a".into(), &"c".into()).unwrap();
        assert_eq!(p.cost, 2);
        assert_eq!(p.len(), 2);
    }

    #[test]
    fn equal_cost_prefers_fewer_hops() {
        let t = Duration::from_secs(1);
        let g = StateGraphBuilder::new("a")
            .state(StateDef::new("a").with_signature(sig("a")))
            .state(StateDef::new("b").with_signature(sig("b")))
            .state(StateDef::new("c").with_signature(sig("c")))
            .weighted_transition("a", "b", ActionRecipe::tap("a_b", 0, 0), 1, t)
            .weighted_transition("b", "c", ActionRecipe::tap("b_c", 0, 0), 1, t)
            .weighted_transition("a", "c", ActionRecipe::tap("a_c", 0, 0), 2, t)
            .build(&registry(&["a", "b", "c"]))
            .unwrap();
        let p = plan(&g, &"a".into(), &"c".into()).unwrap();
        assert_eq!(p.cost, 2);
        assert_eq!(p.labels(&g), vec!["a -> c"]);
    }

    #[test]
    fn planning_is_deterministic() {
        let g = sample();
        let first = plan(&g, &"event".into(), &"shop".into());
        for _ in 0..10 {
            assert_eq!(plan(&g, &"event".into(), &"shop".into()), first);
        }
    }
}
