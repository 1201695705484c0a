//! Rule reference graph of one compilation unit.
//!
//! Rules of earlier units are already sealed and cannot refer forward, so
//! cycles can only close inside the unit being added.

use crate::error::{EngineError, Location, Result};
use crate::ir::{CompiledRule, RuleId};

struct Node {
    name: String,
    location: Location,
    is_global: bool,
    dependencies: Vec<RuleId>,
}

pub(crate) struct RuleGraph {
    /// Id of the first rule of the unit.
    base: RuleId,
    nodes: Vec<Node>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

impl RuleGraph {
    pub fn new(base: RuleId) -> Self {
        Self {
            base,
            nodes: Vec::new(),
        }
    }

    /// Add the next rule of the unit; its id is `base + number of rules added`.
    pub fn add_rule(
        &mut self,
        name: &str,
        location: Location,
        is_global: bool,
        dependencies: Vec<RuleId>,
    ) {
        self.nodes.push(Node {
            name: name.to_string(),
            location,
            is_global,
            dependencies,
        });
    }

    /// A global rule gates every other rule, so it may only depend on other
    /// global rules. `earlier` holds the rules of previous units.
    pub fn check_global_dependencies(&self, earlier: &[CompiledRule]) -> Result<()> {
        for node in self.nodes.iter().filter(|node| node.is_global) {
            for &dependency in &node.dependencies {
                let target = match self.local(dependency) {
                    Some(local) => Some((local.is_global, local.name.as_str())),
                    None => earlier
                        .get(dependency as usize)
                        .map(|rule| (rule.is_global, rule.name.as_str())),
                };
                if let Some((false, name)) = target {
                    return Err(EngineError::semantic(
                        format!(
                            "global rule `{}` depends on non-global rule `{name}`",
                            node.name
                        ),
                        node.location,
                    ));
                }
            }
        }
        Ok(())
    }

    /// Reject reference cycles, reporting the path that closes one.
    pub fn check_cycles(&self) -> Result<()> {
        let mut marks = vec![Mark::Unvisited; self.nodes.len()];

        for root in 0..self.nodes.len() {
            if marks[root] != Mark::Unvisited {
                continue;
            }
            // Iterative DFS: (node, next dependency to visit)
            let mut stack: Vec<(usize, usize)> = vec![(root, 0)];
            marks[root] = Mark::InProgress;

            while let Some(top) = stack.last_mut() {
                let node = top.0;
                let Some(&dependency) = self.nodes[node].dependencies.get(top.1) else {
                    marks[node] = Mark::Done;
                    stack.pop();
                    continue;
                };
                top.1 += 1;

                let Some(target) = self.local_index(dependency) else {
                    continue;
                };
                match marks[target] {
                    Mark::Done => {}
                    Mark::Unvisited => {
                        marks[target] = Mark::InProgress;
                        stack.push((target, 0));
                    }
                    Mark::InProgress => {
                        let start = stack
                            .iter()
                            .position(|(n, _)| *n == target)
                            .unwrap_or(0);
                        let mut path: Vec<&str> = stack[start..]
                            .iter()
                            .map(|(n, _)| self.nodes[*n].name.as_str())
                            .collect();
                        path.push(self.nodes[target].name.as_str());
                        return Err(EngineError::semantic(
                            format!("cyclic rule reference: {}", path.join(" -> ")),
                            self.nodes[target].location,
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    fn local_index(&self, rule: RuleId) -> Option<usize> {
        let index = rule.checked_sub(self.base)? as usize;
        (index < self.nodes.len()).then_some(index)
    }

    fn local(&self, rule: RuleId) -> Option<&Node> {
        self.local_index(rule).map(|index| &self.nodes[index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc() -> Location {
        Location::new(1, 1)
    }

    #[test]
    fn test_acyclic_graph() {
        let mut graph = RuleGraph::new(0);
        graph.add_rule("a", loc(), false, vec![1, 2]);
        graph.add_rule("b", loc(), false, vec![2]);
        graph.add_rule("c", loc(), false, vec![]);
        assert!(graph.check_cycles().is_ok());
    }

    #[test]
    fn test_two_rule_cycle() {
        let mut graph = RuleGraph::new(5);
        graph.add_rule("a", loc(), false, vec![6]);
        graph.add_rule("b", loc(), false, vec![5]);
        let err = graph.check_cycles().unwrap_err();
        assert_eq!(
            err,
            EngineError::semantic("cyclic rule reference: a -> b -> a", loc())
        );
    }

    #[test]
    fn test_self_reference() {
        let mut graph = RuleGraph::new(0);
        graph.add_rule("a", loc(), false, vec![0]);
        assert!(graph.check_cycles().is_err());
    }

    #[test]
    fn test_references_to_earlier_units_are_ignored() {
        let mut graph = RuleGraph::new(3);
        graph.add_rule("a", loc(), false, vec![0, 1]);
        assert!(graph.check_cycles().is_ok());
    }

    #[test]
    fn test_global_depends_on_non_global() {
        let mut graph = RuleGraph::new(0);
        graph.add_rule("g", loc(), true, vec![1]);
        graph.add_rule("n", loc(), false, vec![]);
        let err = graph.check_global_dependencies(&[]).unwrap_err();
        assert!(err.to_string().contains("depends on non-global rule `n`"));

        let mut graph = RuleGraph::new(0);
        graph.add_rule("g", loc(), true, vec![1]);
        graph.add_rule("h", loc(), true, vec![]);
        assert!(graph.check_global_dependencies(&[]).is_ok());
    }
}
