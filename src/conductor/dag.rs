//! Dependency DAG over a batch's tasks: cycle validation, ready-set
//! computation, and execution waves for dry-run display.

use crate::errors::ConductorError;
use std::collections::{BTreeMap, HashSet};

/// Validated dependency graph for one batch. Edges point from a task to
/// the tasks it depends on; only batch members appear.
#[derive(Debug, Clone)]
pub struct DependencyDag {
    /// Submission order, preserved for deterministic scheduling.
    order: Vec<String>,
    deps: BTreeMap<String, Vec<String>>,
}

impl DependencyDag {
    /// Build and validate. Dependencies referencing tasks outside the batch
    /// are rejected; cycles fail with `InvalidDependencyMap`.
    pub fn build(
        task_ids: &[String],
        dependency_map: &BTreeMap<String, Vec<String>>,
    ) -> Result<Self, ConductorError> {
        let members: HashSet<&String> = task_ids.iter().collect();
        let mut deps: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for task_id in task_ids {
            let mut task_deps = dependency_map.get(task_id).cloned().unwrap_or_default();
            task_deps.retain(|d| d != task_id);
            for dep in &task_deps {
                if !members.contains(dep) {
                    return Err(ConductorError::InvalidDependencyMap(format!(
                        "task {task_id} depends on {dep}, which is not in the batch"
                    )));
                }
            }
            task_deps.sort();
            task_deps.dedup();
            deps.insert(task_id.clone(), task_deps);
        }

        let dag = Self {
            order: task_ids.to_vec(),
            deps,
        };
        dag.check_acyclic()?;
        Ok(dag)
    }

    /// An empty map: fully parallel.
    pub fn unconstrained(task_ids: &[String]) -> Self {
        Self {
            order: task_ids.to_vec(),
            deps: task_ids.iter().map(|id| (id.clone(), Vec::new())).collect(),
        }
    }

    pub fn dependency_map(&self) -> &BTreeMap<String, Vec<String>> {
        &self.deps
    }

    fn check_acyclic(&self) -> Result<(), ConductorError> {
        // Kahn's algorithm: anything left unprocessed sits on a cycle.
        let mut remaining: BTreeMap<&String, HashSet<&String>> = self
            .deps
            .iter()
            .map(|(task, deps)| (task, deps.iter().collect()))
            .collect();

        loop {
            let satisfied: Vec<&String> = remaining
                .iter()
                .filter(|(_, deps)| deps.is_empty())
                .map(|(task, _)| *task)
                .collect();
            if satisfied.is_empty() {
                break;
            }
            for task in &satisfied {
                remaining.remove(*task);
            }
            for deps in remaining.values_mut() {
                for task in &satisfied {
                    deps.remove(*task);
                }
            }
        }

        if remaining.is_empty() {
            Ok(())
        } else {
            let cycle: Vec<String> = remaining.keys().map(|k| (*k).clone()).collect();
            Err(ConductorError::InvalidDependencyMap(format!(
                "cycle among tasks: {}",
                cycle.join(", ")
            )))
        }
    }

    /// Tasks from `pending` whose dependencies are all in `satisfied`, in
    /// submission order.
    pub fn ready<'a>(
        &self,
        pending: &'a [String],
        satisfied: &HashSet<String>,
    ) -> Vec<&'a String> {
        pending
            .iter()
            .filter(|task| {
                self.deps
                    .get(*task)
                    .map(|deps| deps.iter().all(|d| satisfied.contains(d)))
                    .unwrap_or(true)
            })
            .collect()
    }

    /// Execution waves: groups runnable in parallel once all previous waves
    /// finished. For `--dry-run` display.
    pub fn waves(&self) -> Vec<Vec<String>> {
        let mut waves = Vec::new();
        let mut satisfied: HashSet<String> = HashSet::new();
        let mut pending: Vec<String> = self.order.clone();

        while !pending.is_empty() {
            let wave: Vec<String> = self
                .ready(&pending, &satisfied)
                .into_iter()
                .cloned()
                .collect();
            if wave.is_empty() {
                break;
            }
            for task in &wave {
                satisfied.insert(task.clone());
            }
            pending.retain(|t| !wave.contains(t));
            waves.push(wave);
        }
        waves
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn map(entries: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
        entries
            .iter()
            .map(|(task, deps)| {
                (
                    task.to_string(),
                    deps.iter().map(|d| d.to_string()).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn linear_chain_produces_one_task_per_wave() {
        let dag = DependencyDag::build(
            &ids(&["a", "b", "c"]),
            &map(&[("b", &["a"]), ("c", &["b"])]),
        )
        .unwrap();
        assert_eq!(dag.waves(), vec![vec!["a"], vec!["b"], vec!["c"]]);
    }

    #[test]
    fn diamond_runs_middle_in_parallel() {
        let dag = DependencyDag::build(
            &ids(&["a", "b", "c", "d"]),
            &map(&[("b", &["a"]), ("c", &["a"]), ("d", &["b", "c"])]),
        )
        .unwrap();
        let waves = dag.waves();
        assert_eq!(waves.len(), 3);
        assert_eq!(waves[0], vec!["a"]);
        assert!(waves[1].contains(&"b".to_string()) && waves[1].contains(&"c".to_string()));
        assert_eq!(waves[2], vec!["d"]);
    }

    #[test]
    fn cycles_are_rejected() {
        let err = DependencyDag::build(
            &ids(&["a", "b"]),
            &map(&[("a", &["b"]), ("b", &["a"])]),
        )
        .unwrap_err();
        assert!(matches!(err, ConductorError::InvalidDependencyMap(_)));
    }

    #[test]
    fn foreign_dependencies_are_rejected() {
        let err = DependencyDag::build(&ids(&["a"]), &map(&[("a", &["ghost"])])).unwrap_err();
        assert!(matches!(err, ConductorError::InvalidDependencyMap(_)));
    }

    #[test]
    fn self_dependencies_are_dropped() {
        let dag = DependencyDag::build(&ids(&["a"]), &map(&[("a", &["a"])])).unwrap();
        assert_eq!(dag.waves(), vec![vec!["a"]]);
    }

    #[test]
    fn ready_set_respects_satisfied_deps() {
        let dag = DependencyDag::build(
            &ids(&["a", "b", "c"]),
            &map(&[("b", &["a"]), ("c", &[])]),
        )
        .unwrap();
        let pending = ids(&["a", "b", "c"]);

        let none_done = HashSet::new();
        let ready: Vec<_> = dag.ready(&pending, &none_done);
        assert_eq!(ready, vec!["a", "c"]);

        let mut a_done = HashSet::new();
        a_done.insert("a".to_string());
        let pending = ids(&["b"]);
        assert_eq!(dag.ready(&pending, &a_done), vec!["b"]);
    }

    #[test]
    fn unconstrained_is_one_wave() {
        let dag = DependencyDag::unconstrained(&ids(&["a", "b", "c"]));
        assert_eq!(dag.waves().len(), 1);
    }
}
