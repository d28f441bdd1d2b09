use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;

use anyhow::{Context, Result};
use cargo_metadata::MetadataCommand;

struct Rule {
    package: &'static str,
    forbidden: &'static [&'static str],
}

// The validator and the wire types stay free of I/O stacks; the store never
// talks to the completion provider or serves HTTP.
const RULES: &[Rule] = &[
    Rule {
        package: "jobchat-contracts",
        forbidden: &["sqlx", "reqwest", "axum", "tokio", "jobchat-store"],
    },
    Rule {
        package: "jobchat-policy",
        forbidden: &["sqlx", "reqwest", "axum", "tokio", "jobchat-store"],
    },
    Rule {
        package: "jobchat-store",
        forbidden: &["reqwest", "axum", "jobchat-server"],
    },
];

fn main() -> Result<()> {
    let metadata = MetadataCommand::new()
        .exec()
        .context("failed to run `cargo metadata`")?;

    let resolve = metadata
        .resolve
        .as_ref()
        .context("`cargo metadata` did not include a resolved dependency graph")?;

    let id_to_name: HashMap<_, _> = metadata
        .packages
        .iter()
        .map(|p| (p.id.clone(), p.name.as_str()))
        .collect();

    let adjacency: HashMap<_, _> = resolve
        .nodes
        .iter()
        .map(|node| {
            let deps: Vec<_> = node.deps.iter().map(|dep| dep.pkg.clone()).collect();
            (node.id.clone(), deps)
        })
        .collect();

    let mut failed = false;
    for rule in RULES {
        let root = metadata
            .packages
            .iter()
            .find(|p| p.name.as_str() == rule.package)
            .with_context(|| format!("package `{}` not found in workspace", rule.package))?;

        let violations = forbidden_reachable(&root.id, &adjacency, &id_to_name, rule.forbidden);
        if violations.is_empty() {
            println!(
                "OK: `{}` has no dependency edge to {}",
                rule.package,
                rule.forbidden.join(", ")
            );
        } else {
            eprintln!(
                "FAIL: `{}` depends on forbidden crate(s): {}",
                rule.package,
                violations.join(", ")
            );
            failed = true;
        }
    }

    if failed {
        std::process::exit(1);
    }
    Ok(())
}

/// Walks the resolved graph from `root` and returns every forbidden crate
/// reachable through any path, sorted and deduplicated.
fn forbidden_reachable<Id>(
    root: &Id,
    adjacency: &HashMap<Id, Vec<Id>>,
    id_to_name: &HashMap<Id, &str>,
    forbidden: &[&str],
) -> Vec<String>
where
    Id: Clone + Eq + Hash,
{
    let mut visited = HashSet::new();
    let mut queue = VecDeque::new();
    queue.push_back(root.clone());
    visited.insert(root.clone());

    let mut violations = Vec::new();

    while let Some(current) = queue.pop_front() {
        let Some(deps) = adjacency.get(&current) else {
            continue;
        };

        for dep in deps.iter().cloned() {
            if !visited.insert(dep.clone()) {
                continue;
            }

            if let Some(name) = id_to_name.get(&dep)
                && forbidden.contains(name)
            {
                violations.push((*name).to_string());
            }

            queue.push_back(dep);
        }
    }

    violations.sort();
    violations.dedup();
    violations
}
