use crate::core::error::ModelError;
use crate::core::models::ids::{ContainerId, ParticleId, ScoreStateId};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use tracing::debug;

/// Something a scorable object can read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ModelObject {
    Particle(ParticleId),
    Container(ContainerId),
}

/// A unit of work that may have to run before restraints are scored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScheduleNode {
    /// A derived container that must be refreshed.
    Container(ContainerId),
    ScoreState(ScoreStateId),
}

/// The declared reads and writes of one schedule node.
#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub node: ScheduleNode,
    pub name: String,
    pub inputs: Vec<ModelObject>,
    pub outputs: Vec<ModelObject>,
}

/// A topologically ordered view of every schedule node in a model.
///
/// An edge runs from `u` to `v` whenever `u` writes an object that `v` reads. Nodes that read
/// and write the same object do not depend on themselves.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    order: Vec<ScheduleNode>,
    rank: HashMap<ScheduleNode, usize>,
    inputs: HashMap<ScheduleNode, Vec<ModelObject>>,
    producers: HashMap<ModelObject, Vec<ScheduleNode>>,
}

impl DependencyGraph {
    /// Orders the given nodes so every producer precedes its consumers.
    ///
    /// Ties are broken by the order of `specs`, which makes the schedule deterministic.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::DependencyCycle`] naming the nodes on one cycle.
    pub fn build(specs: Vec<NodeSpec>) -> Result<Self, ModelError> {
        let mut producers: HashMap<ModelObject, Vec<usize>> = HashMap::new();
        for (index, spec) in specs.iter().enumerate() {
            for object in &spec.outputs {
                let list = producers.entry(*object).or_default();
                if list.last() != Some(&index) {
                    list.push(index);
                }
            }
        }

        let mut successors: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); specs.len()];
        let mut in_degree = vec![0usize; specs.len()];
        for (consumer, spec) in specs.iter().enumerate() {
            for object in &spec.inputs {
                for &producer in producers.get(object).into_iter().flatten() {
                    if producer != consumer && successors[producer].insert(consumer) {
                        in_degree[consumer] += 1;
                    }
                }
            }
        }

        let mut ready: BTreeSet<usize> = (0..specs.len()).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(specs.len());
        while let Some(next) = ready.pop_first() {
            order.push(next);
            for &successor in &successors[next] {
                in_degree[successor] -= 1;
                if in_degree[successor] == 0 {
                    ready.insert(successor);
                }
            }
        }

        if order.len() < specs.len() {
            let members = find_cycle(&successors, &in_degree)
                .into_iter()
                .map(|index| specs[index].name.clone())
                .collect();
            return Err(ModelError::DependencyCycle { members });
        }

        debug!(nodes = order.len(), "Built dependency graph.");

        let rank = order
            .iter()
            .enumerate()
            .map(|(position, &index)| (specs[index].node, position))
            .collect();
        let producers = producers
            .into_iter()
            .map(|(object, nodes)| (object, nodes.into_iter().map(|i| specs[i].node).collect()))
            .collect();
        let ordered_nodes = order.iter().map(|&index| specs[index].node).collect();
        let inputs = specs
            .into_iter()
            .map(|spec| (spec.node, spec.inputs))
            .collect();

        Ok(Self {
            order: ordered_nodes,
            rank,
            inputs,
            producers,
        })
    }

    /// Every node in dependency order.
    pub fn order(&self) -> &[ScheduleNode] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// The minimal set of nodes that must run before `objects` can be read, in dependency order.
    pub fn required_for(&self, objects: &[ModelObject]) -> Vec<ScheduleNode> {
        let mut required: HashSet<ScheduleNode> = HashSet::new();
        let mut seen: HashSet<ModelObject> = HashSet::new();
        let mut queue: VecDeque<ModelObject> = objects.iter().copied().collect();
        while let Some(object) = queue.pop_front() {
            if !seen.insert(object) {
                continue;
            }
            for &node in self.producers.get(&object).into_iter().flatten() {
                if required.insert(node) {
                    queue.extend(self.inputs.get(&node).into_iter().flatten().copied());
                }
            }
        }
        let mut nodes: Vec<ScheduleNode> = required.into_iter().collect();
        nodes.sort_by_key(|node| self.rank.get(node).copied().unwrap_or(usize::MAX));
        nodes
    }
}

/// Finds one cycle among the nodes Kahn's algorithm could not order, in edge order.
///
/// Every unresolved node still has an unresolved predecessor, so walking predecessors must
/// eventually revisit a node.
fn find_cycle(successors: &[BTreeSet<usize>], in_degree: &[usize]) -> Vec<usize> {
    let mut predecessors: Vec<Vec<usize>> = vec![Vec::new(); successors.len()];
    for (from, targets) in successors.iter().enumerate() {
        for &to in targets {
            predecessors[to].push(from);
        }
    }
    let Some(start) = (0..in_degree.len()).find(|&i| in_degree[i] > 0) else {
        return Vec::new();
    };
    let mut path = vec![start];
    let mut position: HashMap<usize, usize> = HashMap::from([(start, 0)]);
    let mut current = start;
    loop {
        let Some(&previous) = predecessors[current].iter().find(|&&p| in_degree[p] > 0) else {
            return path;
        };
        if let Some(&at) = position.get(&previous) {
            let mut cycle = path[at..].to_vec();
            cycle.reverse();
            return cycle;
        }
        position.insert(previous, path.len());
        path.push(previous);
        current = previous;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    struct Ids {
        particles: Vec<ParticleId>,
        states: Vec<ScoreStateId>,
    }

    fn make_ids(particles: usize, states: usize) -> Ids {
        let mut p: SlotMap<ParticleId, ()> = SlotMap::with_key();
        let mut s: SlotMap<ScoreStateId, ()> = SlotMap::with_key();
        Ids {
            particles: (0..particles).map(|_| p.insert(())).collect(),
            states: (0..states).map(|_| s.insert(())).collect(),
        }
    }

    fn spec(state: ScoreStateId, name: &str, inputs: &[ParticleId], outputs: &[ParticleId]) -> NodeSpec {
        NodeSpec {
            node: ScheduleNode::ScoreState(state),
            name: name.to_string(),
            inputs: inputs.iter().copied().map(ModelObject::Particle).collect(),
            outputs: outputs.iter().copied().map(ModelObject::Particle).collect(),
        }
    }

    #[test]
    fn producers_run_before_consumers() {
        let ids = make_ids(3, 2);
        let p = &ids.particles;
        let consumer = spec(ids.states[0], "consumer", &[p[1]], &[p[2]]);
        let producer = spec(ids.states[1], "producer", &[p[0]], &[p[1]]);

        let graph = DependencyGraph::build(vec![consumer, producer]).unwrap();

        assert_eq!(
            graph.order(),
            &[
                ScheduleNode::ScoreState(ids.states[1]),
                ScheduleNode::ScoreState(ids.states[0])
            ]
        );
    }

    #[test]
    fn independent_nodes_keep_declaration_order() {
        let ids = make_ids(4, 2);
        let p = &ids.particles;
        let graph = DependencyGraph::build(vec![
            spec(ids.states[0], "a", &[p[0]], &[p[1]]),
            spec(ids.states[1], "b", &[p[2]], &[p[3]]),
        ])
        .unwrap();
        assert_eq!(graph.order()[0], ScheduleNode::ScoreState(ids.states[0]));
    }

    #[test]
    fn self_reads_are_not_cycles() {
        let ids = make_ids(1, 1);
        let p = &ids.particles;
        let graph = DependencyGraph::build(vec![spec(ids.states[0], "self", &[p[0]], &[p[0]])]);
        assert!(graph.is_ok());
    }

    #[test]
    fn cycles_are_reported_with_member_names() {
        let ids = make_ids(2, 3);
        let p = &ids.particles;
        let result = DependencyGraph::build(vec![
            spec(ids.states[0], "forward", &[p[0]], &[p[1]]),
            spec(ids.states[1], "backward", &[p[1]], &[p[0]]),
            spec(ids.states[2], "bystander", &[], &[]),
        ]);
        match result {
            Err(ModelError::DependencyCycle { members }) => {
                assert_eq!(members.len(), 2);
                assert!(members.contains(&"forward".to_string()));
                assert!(members.contains(&"backward".to_string()));
            }
            other => panic!("expected a cycle, got {other:?}"),
        }
    }

    #[test]
    fn required_for_selects_transitive_producers_only() {
        let ids = make_ids(5, 3);
        let p = &ids.particles;
        let graph = DependencyGraph::build(vec![
            spec(ids.states[0], "second", &[p[1]], &[p[2]]),
            spec(ids.states[1], "first", &[p[0]], &[p[1]]),
            spec(ids.states[2], "unrelated", &[p[3]], &[p[4]]),
        ])
        .unwrap();

        let required = graph.required_for(&[ModelObject::Particle(p[2])]);

        assert_eq!(
            required,
            vec![
                ScheduleNode::ScoreState(ids.states[1]),
                ScheduleNode::ScoreState(ids.states[0])
            ]
        );
        assert!(graph.required_for(&[ModelObject::Particle(p[0])]).is_empty());
    }
}
