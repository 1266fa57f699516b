//! # Grafo de dependências de tasks (DAG)
//!
//! Constrói o grafo dirigido `dep → task` a partir de `Task::deps`, detecta
//! ciclos com um witness concreto, calcula fases por profundidade de maior
//! caminho, e responde às consultas de subgrafo usadas pelo scheduler.
//!
//! ## Para todos entenderem:
//!
//! Pense nas tasks como uma lista de afazeres com pré-requisitos: "B" só
//! pode rodar depois de "A". Se você desenhar uma seta de A para B para
//! cada pré-requisito, o resultado é um grafo. Rodá-lo corretamente exige
//! duas coisas: que não haja um ciclo (A depende de B que depende de A —
//! ninguém nunca começa) e uma ordem de execução que respeite as setas.
//!
//! Grounded on the teacher's `planner::DagPlanner` (`dependencies`/
//! `dependents` maps, roots-as-starting-points), generalized from a flat
//! list of independent steps into a full cycle-checked DAG with phase
//! decomposition and induced-subgraph queries.

use std::collections::{HashMap, HashSet};

use crate::config::Task;
use crate::errors::{CycleWitness, GraphError};

#[derive(Debug, Clone)]
struct GraphNode {
    dependencies: HashSet<String>,
    dependents: HashSet<String>,
}

/// A validated, acyclic task graph. Only `Graph::build` constructs one, so
/// every `Graph` in existence is guaranteed cycle-free.
#[derive(Debug, Clone)]
pub struct Graph {
    nodes: HashMap<String, GraphNode>,
}

impl Graph {
    /// Builds the graph, validating dependency references first (an
    /// unknown dep is a sharper error than "this cycle involves a name
    /// that doesn't exist") and checking for cycles second.
    pub fn build(tasks: &HashMap<String, Task>) -> Result<Self, GraphError> {
        for task in tasks.values() {
            for dep in &task.deps {
                if !tasks.contains_key(dep) {
                    return Err(GraphError::UnknownDependency {
                        task: task.name.clone(),
                        dep: dep.clone(),
                    });
                }
            }
        }

        let mut nodes: HashMap<String, GraphNode> = tasks
            .keys()
            .map(|name| {
                (
                    name.clone(),
                    GraphNode { dependencies: HashSet::new(), dependents: HashSet::new() },
                )
            })
            .collect();

        for task in tasks.values() {
            for dep in &task.deps {
                nodes.get_mut(&task.name).unwrap().dependencies.insert(dep.clone());
                nodes.get_mut(dep).unwrap().dependents.insert(task.name.clone());
            }
        }

        let graph = Self { nodes };
        if let Some(witness) = graph.find_cycle() {
            return Err(GraphError::Cycle { witness });
        }
        Ok(graph)
    }

    pub fn contains(&self, task: &str) -> bool {
        self.nodes.contains_key(task)
    }

    pub fn task_names(&self) -> impl Iterator<Item = &String> {
        self.nodes.keys()
    }

    // ========================================================================
    // DETECÇÃO DE CICLOS (Tarjan's SCC)
    // ========================================================================

    /// Se existe um ciclo, retorna um witness concreto `[v0, v1, ..., v0]`.
    /// Implementação: Tarjan's algorithm localiza SCCs; a primeira SCC com
    /// mais de um vértice, ou um vértice com self-loop, é a fonte do
    /// witness; dentro dela, uma DFS restrita aos membros da SCC encontra
    /// o caminho de volta ao vértice inicial.
    fn find_cycle(&self) -> Option<CycleWitness> {
        let sccs = tarjan_scc(&self.nodes);
        for scc in &sccs {
            let has_self_loop = scc.len() == 1
                && self.nodes[&scc[0]].dependencies.contains(&scc[0]);
            if scc.len() > 1 || has_self_loop {
                return Some(witness_within_scc(&self.nodes, scc));
            }
        }
        None
    }

    // ========================================================================
    // ORDEM TOPOLÓGICA E FASES
    // ========================================================================

    /// Any linearization consistent with edges, for display only.
    pub fn topological_order(&self) -> Vec<String> {
        let mut in_degree: HashMap<&str, usize> = self
            .nodes
            .iter()
            .map(|(name, node)| (name.as_str(), node.dependencies.len()))
            .collect();
        let mut ready: Vec<&str> =
            in_degree.iter().filter(|(_, d)| **d == 0).map(|(n, _)| *n).collect();
        ready.sort();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(name) = ready.pop() {
            order.push(name.to_string());
            let mut newly_ready = Vec::new();
            for dependent in &self.nodes[name].dependents {
                let degree = in_degree.get_mut(dependent.as_str()).unwrap();
                *degree -= 1;
                if *degree == 0 {
                    newly_ready.push(dependent.as_str());
                }
            }
            newly_ready.sort();
            ready.extend(newly_ready);
        }
        order
    }

    /// Phase k = { v : depth(v) = k }, where depth(root) = 0 and
    /// depth(v) = 1 + max(depth(u)) over incoming edges. Gives maximum
    /// parallelism while honoring dependencies.
    pub fn phases(&self) -> Vec<Vec<String>> {
        let mut depth: HashMap<String, usize> = HashMap::new();
        for name in self.topological_order() {
            let d = self.nodes[&name]
                .dependencies
                .iter()
                .map(|dep| depth[dep] + 1)
                .max()
                .unwrap_or(0);
            depth.insert(name, d);
        }

        let max_depth = depth.values().copied().max().unwrap_or(0);
        let mut phases = vec![Vec::new(); max_depth + 1];
        for (name, d) in depth {
            phases[d].push(name);
        }
        for phase in phases.iter_mut() {
            phase.sort();
        }
        phases
    }

    // ========================================================================
    // CONSULTAS DE SUBGRAFO
    // ========================================================================

    /// Transitive closure of what `task` depends on.
    pub fn dependencies(&self, task: &str) -> HashSet<String> {
        self.transitive(task, |node| &node.dependencies)
    }

    /// Transitive closure of what depends on `task`.
    pub fn dependents(&self, task: &str) -> HashSet<String> {
        self.transitive(task, |node| &node.dependents)
    }

    fn transitive(
        &self,
        start: &str,
        edges: impl Fn(&GraphNode) -> &HashSet<String>,
    ) -> HashSet<String> {
        let mut seen = HashSet::new();
        let mut stack = vec![start.to_string()];
        while let Some(name) = stack.pop() {
            if let Some(node) = self.nodes.get(&name) {
                for next in edges(node) {
                    if seen.insert(next.clone()) {
                        stack.push(next.clone());
                    }
                }
            }
        }
        seen
    }

    /// The induced subgraph on `{targets} ∪ dependencies(targets)`: exactly
    /// the transitive closure the scheduler needs to execute.
    pub fn subgraph_for(&self, targets: &[String]) -> Graph {
        let mut keep: HashSet<String> = targets.iter().cloned().collect();
        for target in targets {
            keep.extend(self.dependencies(target));
        }

        let nodes = keep
            .iter()
            .map(|name| {
                let node = &self.nodes[name];
                (
                    name.clone(),
                    GraphNode {
                        dependencies: node.dependencies.intersection(&keep).cloned().collect(),
                        dependents: node.dependents.intersection(&keep).cloned().collect(),
                    },
                )
            })
            .collect();
        Graph { nodes }
    }
}

fn tarjan_scc(nodes: &HashMap<String, GraphNode>) -> Vec<Vec<String>> {
    struct State<'a> {
        nodes: &'a HashMap<String, GraphNode>,
        index: HashMap<String, usize>,
        lowlink: HashMap<String, usize>,
        on_stack: HashSet<String>,
        stack: Vec<String>,
        counter: usize,
        sccs: Vec<Vec<String>>,
    }

    fn strongconnect(v: &str, state: &mut State) {
        state.index.insert(v.to_string(), state.counter);
        state.lowlink.insert(v.to_string(), state.counter);
        state.counter += 1;
        state.stack.push(v.to_string());
        state.on_stack.insert(v.to_string());

        let deps = state.nodes[v].dependencies.clone();
        for w in &deps {
            if !state.index.contains_key(w) {
                strongconnect(w, state);
                let low_v = state.lowlink[v];
                let low_w = state.lowlink[w];
                state.lowlink.insert(v.to_string(), low_v.min(low_w));
            } else if state.on_stack.contains(w) {
                let low_v = state.lowlink[v];
                let idx_w = state.index[w];
                state.lowlink.insert(v.to_string(), low_v.min(idx_w));
            }
        }

        if state.lowlink[v] == state.index[v] {
            let mut scc = Vec::new();
            loop {
                let w = state.stack.pop().unwrap();
                state.on_stack.remove(&w);
                let done = w == v;
                scc.push(w);
                if done {
                    break;
                }
            }
            state.sccs.push(scc);
        }
    }

    let mut state = State {
        nodes,
        index: HashMap::new(),
        lowlink: HashMap::new(),
        on_stack: HashSet::new(),
        stack: Vec::new(),
        counter: 0,
        sccs: Vec::new(),
    };

    let mut names: Vec<&String> = nodes.keys().collect();
    names.sort();
    for name in names {
        if !state.index.contains_key(name) {
            strongconnect(name, &mut state);
        }
    }
    state.sccs
}

/// DFS restricted to `scc`'s members, starting at any vertex, until the
/// start vertex is re-reached. Any witness is acceptable (design note §9:
/// canonicalization is unspecified).
fn witness_within_scc(nodes: &HashMap<String, GraphNode>, scc: &[String]) -> CycleWitness {
    let members: HashSet<&String> = scc.iter().collect();
    let start = &scc[0];

    let mut path = vec![start.clone()];
    let mut visited: HashSet<String> = HashSet::new();

    fn dfs(
        current: &str,
        start: &str,
        nodes: &HashMap<String, GraphNode>,
        members: &HashSet<&String>,
        visited: &mut HashSet<String>,
        path: &mut Vec<String>,
    ) -> bool {
        for dep in &nodes[current].dependencies {
            if !members.contains(dep) {
                continue;
            }
            if dep == start {
                path.push(dep.clone());
                return true;
            }
            if visited.insert(dep.clone()) {
                path.push(dep.clone());
                if dfs(dep, start, nodes, members, visited, path) {
                    return true;
                }
                path.pop();
            }
        }
        false
    }

    visited.insert(start.clone());
    dfs(start, start, nodes, &members, &mut visited, &mut path);
    CycleWitness(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OnTarget;

    fn task(name: &str, deps: &[&str]) -> Task {
        let mut t = Task::new(name, OnTarget::Local);
        t.deps = deps.iter().map(|s| s.to_string()).collect();
        t
    }

    fn tasks(list: Vec<Task>) -> HashMap<String, Task> {
        list.into_iter().map(|t| (t.name.clone(), t)).collect()
    }

    #[test]
    fn diamond_graph_has_three_phases() {
        let graph = Graph::build(&tasks(vec![
            task("A", &[]),
            task("B", &["A"]),
            task("C", &["A"]),
            task("D", &["B", "C"]),
        ]))
        .unwrap();

        let phases = graph.phases();
        assert_eq!(phases.len(), 3);
        assert_eq!(phases[0], vec!["A"]);
        assert_eq!(phases[1], vec!["B", "C"]);
        assert_eq!(phases[2], vec!["D"]);
    }

    #[test]
    fn topological_order_respects_edges() {
        let graph = Graph::build(&tasks(vec![
            task("A", &[]),
            task("B", &["A"]),
        ]))
        .unwrap();
        let order = graph.topological_order();
        let pos_a = order.iter().position(|n| n == "A").unwrap();
        let pos_b = order.iter().position(|n| n == "B").unwrap();
        assert!(pos_a < pos_b);
    }

    #[test]
    fn unknown_dependency_is_rejected_before_cycle_check() {
        let err = Graph::build(&tasks(vec![task("A", &["ghost"])])).unwrap_err();
        assert!(matches!(err, GraphError::UnknownDependency { .. }));
    }

    #[test]
    fn two_node_cycle_yields_witness() {
        let err = Graph::build(&tasks(vec![task("A", &["B"]), task("B", &["A"])])).unwrap_err();
        match err {
            GraphError::Cycle { witness } => {
                assert_eq!(witness.0.first(), witness.0.last());
                assert!(witness.0.len() >= 2);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let err = Graph::build(&tasks(vec![task("A", &["A"])])).unwrap_err();
        assert!(matches!(err, GraphError::Cycle { .. }));
    }

    #[test]
    fn dependencies_is_transitive_closure() {
        let graph = Graph::build(&tasks(vec![
            task("A", &[]),
            task("B", &["A"]),
            task("C", &["B"]),
        ]))
        .unwrap();
        let deps = graph.dependencies("C");
        assert!(deps.contains("A"));
        assert!(deps.contains("B"));
    }

    #[test]
    fn subgraph_for_excludes_unrelated_tasks() {
        let graph = Graph::build(&tasks(vec![
            task("A", &[]),
            task("B", &["A"]),
            task("Unrelated", &[]),
        ]))
        .unwrap();
        let sub = graph.subgraph_for(&["B".to_string()]);
        assert!(sub.contains("A"));
        assert!(sub.contains("B"));
        assert!(!sub.contains("Unrelated"));
    }
}
