use crate::registry::{StepPolicy, StepRegistry};
use gencore::{seed, CompileError, StepSpec, Template};
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use std::collections::{BTreeSet, HashMap};

/// A compiled pipeline step: its spec plus resolved dependency edges and
/// the execution policy in force for this run.
#[derive(Debug, Clone)]
pub struct StepNode {
    pub spec: StepSpec,
    /// Indices into the DAG's node list. Deduplicated; a node consuming
    /// two outputs of the same producer holds a single edge.
    pub predecessors: Vec<usize>,
    pub successors: Vec<usize>,
    pub policy: StepPolicy,
}

/// Executable dependency graph for one template.
#[derive(Debug, Clone)]
pub struct PipelineDag {
    pub nodes: Vec<StepNode>,
    /// Declared outputs consumed by no other node; these become the job's
    /// final artifacts on completion.
    pub terminal_outputs: BTreeSet<String>,
}

impl PipelineDag {
    /// Nodes with zero predecessors, ready as soon as seeds are in place.
    pub fn roots(&self) -> Vec<usize> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.predecessors.is_empty())
            .map(|(i, _)| i)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Compiles a template's ordered step specifications into a `PipelineDag`
/// with resolved input/output bindings. All validation happens here;
/// a template that compiles cannot fail on name resolution at runtime.
pub struct PipelineCompiler<'r> {
    registry: &'r StepRegistry,
}

impl<'r> PipelineCompiler<'r> {
    pub fn new(registry: &'r StepRegistry) -> Self {
        Self { registry }
    }

    pub fn compile(&self, template: &Template) -> Result<PipelineDag, CompileError> {
        if template.pipeline.is_empty() {
            return Err(CompileError::EmptyPipeline);
        }

        // Producer of each visible name. Seed names carry no producer node.
        let mut producers: HashMap<&str, Option<usize>> = HashMap::new();
        for name in seed::ALL {
            producers.insert(name, None);
        }

        let mut preds: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); template.pipeline.len()];
        let mut succs: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); template.pipeline.len()];

        for (index, spec) in template.pipeline.iter().enumerate() {
            if !self.registry.contains(&spec.step_type) {
                return Err(CompileError::UnknownStepType {
                    step_id: spec.id.clone(),
                    step_type: spec.step_type.clone(),
                });
            }

            // Inputs resolve against seeds and strictly earlier steps, so a
            // step reading its own output is an UnknownInput, not a cycle.
            for input in &spec.inputs {
                match producers.get(input.as_str()) {
                    Some(None) => {}
                    Some(Some(producer)) => {
                        preds[index].insert(*producer);
                        succs[*producer].insert(index);
                    }
                    None => {
                        return Err(CompileError::UnknownInput {
                            step_id: spec.id.clone(),
                            name: input.clone(),
                        });
                    }
                }
            }

            for output in &spec.outputs {
                if producers.contains_key(output.as_str()) {
                    return Err(CompileError::DuplicateOutput {
                        name: output.clone(),
                    });
                }
                producers.insert(output.as_str(), Some(index));
            }
        }

        // Structural sanity check. Resolution only ever points backwards,
        // so a cycle here means the compiler itself is broken.
        let mut graph: DiGraph<usize, ()> = DiGraph::new();
        let indices: Vec<_> = (0..template.pipeline.len())
            .map(|i| graph.add_node(i))
            .collect();
        for (to, sources) in preds.iter().enumerate() {
            for &from in sources {
                graph.add_edge(indices[from], indices[to], ());
            }
        }
        if toposort(&graph, None).is_err() {
            return Err(CompileError::Cycle);
        }

        let consumed: BTreeSet<&str> = template
            .pipeline
            .iter()
            .flat_map(|spec| spec.inputs.iter().map(String::as_str))
            .collect();
        let terminal_outputs = template
            .pipeline
            .iter()
            .flat_map(|spec| spec.outputs.iter())
            .filter(|name| !consumed.contains(name.as_str()))
            .cloned()
            .collect();

        let nodes = template
            .pipeline
            .iter()
            .enumerate()
            .map(|(index, spec)| {
                let mut policy = self.registry.policy(&spec.step_type);
                if let Some(max_attempts) = spec.max_attempts {
                    policy.max_attempts = max_attempts.max(1);
                }
                if let Some(timeout_ms) = spec.timeout_ms {
                    policy.timeout = Some(std::time::Duration::from_millis(timeout_ms));
                }
                StepNode {
                    spec: spec.clone(),
                    predecessors: preds[index].iter().copied().collect(),
                    successors: succs[index].iter().copied().collect(),
                    policy,
                }
            })
            .collect();

        Ok(PipelineDag {
            nodes,
            terminal_outputs,
        })
    }
}
