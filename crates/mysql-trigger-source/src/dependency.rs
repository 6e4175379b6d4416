//! Foreign-key dependency graph and load ordering.

use std::collections::{BTreeSet, HashMap, HashSet};
use sync_core::{SyncError, TableSchema};

/// Edges from each table to the tables it references.
///
/// Only references to tables inside the graph become edges. Duplicate edges
/// collapse; self-references are kept aside and never affect ordering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    tables: Vec<String>,
    edges: HashMap<String, Vec<String>>,
    self_references: BTreeSet<String>,
}

impl DependencyGraph {
    pub fn build(schemas: &[TableSchema]) -> Self {
        let members: HashSet<&str> = schemas.iter().map(|s| s.name.as_str()).collect();
        let mut graph = Self::default();

        for schema in schemas {
            graph.tables.push(schema.name.clone());
            let deps = graph.edges.entry(schema.name.clone()).or_default();
            for referenced in schema.referenced_tables() {
                if referenced == schema.name {
                    graph.self_references.insert(schema.name.clone());
                } else if members.contains(referenced) && !deps.iter().any(|d| d == referenced) {
                    deps.push(referenced.to_string());
                }
            }
        }
        graph
    }

    /// Tables `table` must be loaded after.
    pub fn dependencies(&self, table: &str) -> &[String] {
        self.edges.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn self_references(&self) -> &BTreeSet<String> {
        &self.self_references
    }

    pub fn tables(&self) -> &[String] {
        &self.tables
    }

    /// Referenced tables first, in a deterministic order for a given graph.
    ///
    /// Depth-first over an explicit stack; a table met again while still on
    /// the stack closes a cycle, reported with its path.
    pub fn topological_order(&self) -> Result<Vec<String>, SyncError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            OnStack,
            Done,
        }

        let mut marks: HashMap<&str, Mark> = HashMap::new();
        let mut order = Vec::with_capacity(self.tables.len());

        for root in &self.tables {
            if marks.contains_key(root.as_str()) {
                continue;
            }
            marks.insert(root.as_str(), Mark::OnStack);
            let mut stack: Vec<(&str, usize)> = vec![(root.as_str(), 0)];

            while let Some(top) = stack.last_mut() {
                let (node, next) = *top;
                let deps = self.dependencies(node);
                if next < deps.len() {
                    top.1 += 1;
                    let dep = deps[next].as_str();
                    match marks.get(dep).copied() {
                        Some(Mark::Done) => {}
                        Some(Mark::OnStack) => {
                            let start = stack.iter().position(|(n, _)| *n == dep).unwrap_or(0);
                            let mut path: Vec<String> =
                                stack[start..].iter().map(|(n, _)| n.to_string()).collect();
                            path.push(dep.to_string());
                            return Err(SyncError::DependencyCycle(path));
                        }
                        None => {
                            marks.insert(dep, Mark::OnStack);
                            stack.push((dep, 0));
                        }
                    }
                } else {
                    stack.pop();
                    marks.insert(node, Mark::Done);
                    order.push(node.to_string());
                }
            }
        }
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_core::{ColumnDef, ColumnKind};

    fn table(name: &str, refs: &[&str]) -> TableSchema {
        let mut schema = TableSchema::new(name, vec![ColumnDef::new("id", ColumnKind::Int)])
            .with_primary_key(["id"]);
        for (i, r) in refs.iter().enumerate() {
            schema = schema.with_foreign_key(format!("fk{i}"), *r, "id");
        }
        schema
    }

    fn position(order: &[String], name: &str) -> usize {
        order.iter().position(|t| t == name).unwrap()
    }

    #[test]
    fn test_referenced_tables_come_first() {
        let schemas = vec![
            table("order_items", &["orders", "products"]),
            table("orders", &["customers"]),
            table("products", &[]),
            table("customers", &[]),
        ];
        let order = DependencyGraph::build(&schemas).topological_order().unwrap();
        assert_eq!(order.len(), 4);
        assert!(position(&order, "customers") < position(&order, "orders"));
        assert!(position(&order, "orders") < position(&order, "order_items"));
        assert!(position(&order, "products") < position(&order, "order_items"));
    }

    #[test]
    fn test_order_is_deterministic() {
        let schemas = vec![table("b", &[]), table("a", &[]), table("c", &["a"])];
        let graph = DependencyGraph::build(&schemas);
        assert_eq!(graph.topological_order().unwrap(), vec!["b", "a", "c"]);
        assert_eq!(graph.topological_order().unwrap(), vec!["b", "a", "c"]);
    }

    #[test]
    fn test_duplicate_edges_collapse_and_outside_refs_ignored() {
        let schemas = vec![table("a", &["b", "b", "external"]), table("b", &[])];
        let graph = DependencyGraph::build(&schemas);
        assert_eq!(graph.dependencies("a"), &["b".to_string()]);
        assert_eq!(graph.topological_order().unwrap(), vec!["b", "a"]);
    }

    #[test]
    fn test_self_reference_does_not_block() {
        let schemas = vec![
            table("employees", &["employees", "departments"]),
            table("departments", &[]),
        ];
        let graph = DependencyGraph::build(&schemas);
        assert!(graph.self_references().contains("employees"));
        assert_eq!(
            graph.topological_order().unwrap(),
            vec!["departments", "employees"]
        );
    }

    #[test]
    fn test_cycle_is_reported_with_path() {
        let schemas = vec![table("a", &["b"]), table("b", &["c"]), table("c", &["a"])];
        let err = DependencyGraph::build(&schemas)
            .topological_order()
            .unwrap_err();
        match err {
            SyncError::DependencyCycle(path) => assert_eq!(path, vec!["a", "b", "c", "a"]),
            other => panic!("unexpected error: {other}"),
        }
    }
}
