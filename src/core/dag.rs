use std::collections::{HashMap, HashSet};

use anyhow::{anyhow, Result};

// 依赖声明: 用例名 + 它依赖的用例名
#[derive(Clone, Debug)]
pub struct TestDependency {
    pub name: String,
    pub depends_on: Vec<String>,
}

// 分层执行计划，同一层内可以并行
#[derive(Clone, Debug, Default)]
pub struct ExecutionPlan {
    pub phases: Vec<Vec<String>>,
}

impl ExecutionPlan {
    pub fn total_phases(&self) -> usize {
        self.phases.len()
    }

    pub fn phase_of(&self, test_name: &str) -> Option<usize> {
        self.phases
            .iter()
            .position(|phase| phase.iter().any(|n| n == test_name))
    }
}

// Kahn拓扑分层: 每轮取出入度为0的节点作为一层
// 依赖不存在或取不出节点(成环)都是致命错误
pub fn build_plan(tests: &[TestDependency]) -> Result<ExecutionPlan> {
    if tests.is_empty() {
        return Ok(ExecutionPlan::default());
    }

    let mut remaining: HashSet<String> = tests.iter().map(|t| t.name.clone()).collect();
    let mut in_degree: HashMap<String, usize> =
        tests.iter().map(|t| (t.name.clone(), 0)).collect();
    // {被依赖者: 依赖它的用例}
    let mut dependents: HashMap<String, Vec<String>> = HashMap::new();

    for test in tests {
        for dep in &test.depends_on {
            if !in_degree.contains_key(dep) {
                return Err(anyhow!(
                    "unknown dependency: test '{}' depends on '{}' which doesn't exist",
                    test.name,
                    dep
                ));
            }
            *in_degree.get_mut(&test.name).unwrap() += 1;
            dependents.entry(dep.clone()).or_default().push(test.name.clone());
        }
    }

    let mut phases: Vec<Vec<String>> = Vec::new();

    while !remaining.is_empty() {
        let mut current: Vec<String> = remaining
            .iter()
            .filter(|name| in_degree[*name] == 0)
            .cloned()
            .collect();

        // 一层都取不出来说明剩下的节点成环了
        if current.is_empty() {
            return Err(anyhow!("cyclic dependency detected in tests"));
        }
        current.sort();

        for name in &current {
            remaining.remove(name);
            if let Some(deps) = dependents.get(name) {
                for dependent in deps {
                    *in_degree.get_mut(dependent).unwrap() -= 1;
                }
            }
        }

        phases.push(current);
    }

    Ok(ExecutionPlan { phases })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dep(name: &str, deps: &[&str]) -> TestDependency {
        TestDependency {
            name: name.to_string(),
            depends_on: deps.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn no_dependencies_single_phase() {
        let plan = build_plan(&[dep("a", &[]), dep("b", &[]), dep("c", &[])]).unwrap();
        assert_eq!(plan.total_phases(), 1);
        assert_eq!(plan.phases[0].len(), 3);
    }

    #[test]
    fn linear_chain() {
        let plan = build_plan(&[dep("a", &[]), dep("b", &["a"]), dep("c", &["b"])]).unwrap();
        assert_eq!(
            plan.phases,
            vec![vec!["a".to_string()], vec!["b".to_string()], vec!["c".to_string()]]
        );
    }

    #[test]
    fn parallel_with_shared_dependency() {
        let plan = build_plan(&[
            dep("setup", &[]),
            dep("x", &["setup"]),
            dep("y", &["setup"]),
        ])
        .unwrap();
        assert_eq!(plan.total_phases(), 2);
        assert_eq!(plan.phases[0], vec!["setup".to_string()]);
        assert_eq!(plan.phases[1], vec!["x".to_string(), "y".to_string()]);
    }

    #[test]
    fn multiple_dependencies_wait_for_all() {
        let plan = build_plan(&[
            dep("a", &[]),
            dep("b", &[]),
            dep("c", &["a", "b"]),
        ])
        .unwrap();
        assert_eq!(plan.total_phases(), 2);
        assert_eq!(plan.phases[1], vec!["c".to_string()]);
    }

    #[test]
    fn complex_graph_layers() {
        let plan = build_plan(&[
            dep("auth", &[]),
            dep("create_user", &["auth"]),
            dep("create_org", &["auth"]),
            dep("add_member", &["create_user", "create_org"]),
            dep("report", &["add_member"]),
        ])
        .unwrap();
        assert_eq!(plan.total_phases(), 4);
        assert_eq!(plan.phase_of("auth"), Some(0));
        assert_eq!(plan.phase_of("create_user"), Some(1));
        assert_eq!(plan.phase_of("create_org"), Some(1));
        assert_eq!(plan.phase_of("add_member"), Some(2));
        assert_eq!(plan.phase_of("report"), Some(3));
    }

    #[test]
    fn cycle_is_fatal() {
        let err = build_plan(&[dep("a", &["b"]), dep("b", &["a"])]).unwrap_err();
        assert!(err.to_string().contains("cyclic dependency"));
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let err = build_plan(&[dep("a", &["a"])]).unwrap_err();
        assert!(err.to_string().contains("cyclic dependency"));
    }

    #[test]
    fn unknown_dependency_is_fatal() {
        let err = build_plan(&[dep("a", &["ghost"])]).unwrap_err();
        assert!(err.to_string().contains("unknown dependency"));
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn empty_input_empty_plan() {
        let plan = build_plan(&[]).unwrap();
        assert_eq!(plan.total_phases(), 0);
    }
}
