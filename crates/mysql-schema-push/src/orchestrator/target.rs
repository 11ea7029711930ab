//! Expansion of a directory tree into targets.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::OptionSet;
use crate::fs::{Dir, LogicalSchema};
use crate::instance::{Instance, PoolRegistry};

/// One schema on one instance, with the definitions it should match.
#[derive(Debug, Clone)]
pub struct Target {
    pub instance: Instance,
    pub dir_path: PathBuf,
    pub options: OptionSet,
    pub environment: String,
    pub schema_name: String,
    pub logical_schema: Arc<LogicalSchema>,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.instance, self.schema_name)
    }
}

impl Target {
    /// Base name of the directory defining this target.
    pub fn dir_name(&self) -> String {
        self.dir_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Targets sharing one instance, processed sequentially by a single worker.
#[derive(Debug, Clone)]
pub struct TargetGroup {
    pub instance: Instance,
    pub targets: Vec<Target>,
}

/// Expand `dir` and its descendants, up to `max_depth` levels below it, into targets.
///
/// Returns the targets and the number of directories or instances skipped
/// because of errors.
pub async fn targets_for_dir(
    dir: Dir,
    max_depth: usize,
    registry: &Arc<PoolRegistry>,
) -> (Vec<Target>, usize) {
    let mut targets = Vec::new();
    let mut skip_count = 0;
    let mut pending = vec![(dir, 0usize)];

    while let Some((dir, depth)) = pending.pop() {
        if let Err(e) = dir.options.validate() {
            error!("Skipping {}: {}", dir, e);
            skip_count += 1;
            continue;
        }

        let (dir_targets, dir_skips) = targets_in_dir(&dir, registry).await;
        targets.extend(dir_targets);
        skip_count += dir_skips;

        if dir.subdirs.is_empty() {
            continue;
        }
        if depth >= max_depth {
            warn!(
                "{}: not descending into {} subdirectories, maximum depth {} reached",
                dir,
                dir.subdirs.len(),
                max_depth
            );
            continue;
        }
        let mut children = Vec::new();
        for sub in dir.subdirectories() {
            match sub {
                Ok(sub) => children.push((sub, depth + 1)),
                Err(e) => {
                    error!("Skipping subdirectory of {}: {}", dir, e);
                    skip_count += 1;
                }
            }
        }
        // Reversed so the stack pops subdirectories in name order.
        pending.extend(children.into_iter().rev());
    }

    (targets, skip_count)
}

async fn targets_in_dir(dir: &Dir, registry: &Arc<PoolRegistry>) -> (Vec<Target>, usize) {
    if !dir.has_schema() {
        return (Vec::new(), 0);
    }
    if !dir.has_host() {
        let others = dir.host_in_other_environments();
        if others.is_empty() {
            debug!("{}: defines a schema but no host; skipping", dir);
        } else {
            info!(
                "{}: host is only defined for environment(s) {}, not {}; skipping",
                dir,
                others.join(", "),
                dir.environment
            );
        }
        return (Vec::new(), 0);
    }

    let instances = match dir.instances(registry) {
        Ok(instances) => instances,
        Err(e) => {
            error!("Skipping {}: {}", dir, e);
            return (Vec::new(), 1);
        }
    };

    let logical = Arc::new(dir.logical_schema.clone().unwrap_or_else(|| {
        LogicalSchema::new(
            dir.options.get_str("default-character-set"),
            dir.options.get_str("default-collation"),
        )
    }));

    let mut targets = Vec::new();
    let mut skip_count = 0;
    for instance in instances {
        let schemas = match dir.schema_names(&instance).await {
            Ok(schemas) => schemas,
            Err(e) => {
                error!("Skipping {} for {}: {}", dir, instance, e);
                skip_count += 1;
                continue;
            }
        };
        for schema_name in schemas {
            targets.push(Target {
                instance: instance.clone(),
                dir_path: dir.path.clone(),
                options: dir.options.clone(),
                environment: dir.environment.clone(),
                schema_name,
                logical_schema: logical.clone(),
            });
        }
    }
    (targets, skip_count)
}

/// Bucket targets by instance, keeping first-seen order.
pub fn group_targets(targets: Vec<Target>) -> Vec<TargetGroup> {
    let mut groups: Vec<TargetGroup> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for target in targets {
        let key = target.instance.to_string();
        match index.get(&key) {
            Some(&i) => groups[i].targets.push(target),
            None => {
                index.insert(key, groups.len());
                groups.push(TargetGroup {
                    instance: target.instance.clone(),
                    targets: vec![target],
                });
            }
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, contents: &str) {
        fs::write(dir.join(name), contents).unwrap();
    }

    fn tree() -> TempDir {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        write(root, ".push.yaml", "port: 3307\n");

        let shop = root.join("shop");
        fs::create_dir(&shop).unwrap();
        write(&shop, ".push.yaml", "host: db1,db2\nschema: shop\n");
        write(&shop, "orders.sql", "CREATE TABLE orders (id int);\n");

        let billing = root.join("billing");
        fs::create_dir(&billing).unwrap();
        write(
            &billing,
            ".push.yaml",
            "schema: billing\nenvironments:\n  staging:\n    host: db9\n",
        );
        write(&billing, "invoices.sql", "CREATE TABLE invoices (id int);\n");

        let broken = root.join("broken");
        fs::create_dir(&broken).unwrap();
        write(&broken, ".push.yaml", "host: db3\nschema: x\ntemp-schema-threads: 0\n");
        tmp
    }

    #[tokio::test]
    async fn test_targets_for_dir() {
        let tmp = tree();
        let registry = Arc::new(PoolRegistry::new());
        let dir = Dir::load(tmp.path(), &OptionSet::new(), "production").unwrap();
        let (targets, skips) = targets_for_dir(dir, 32, &registry).await;

        let names: Vec<String> = targets.iter().map(|t| t.to_string()).collect();
        assert_eq!(names, vec!["db1:3307 shop", "db2:3307 shop"]);
        assert_eq!(skips, 1);
        assert_eq!(targets[0].dir_name(), "shop");
        assert!(targets[0].logical_schema.creates.contains_key("orders"));
    }

    #[tokio::test]
    async fn test_targets_for_dir_respects_max_depth() {
        let tmp = tree();
        let registry = Arc::new(PoolRegistry::new());
        let dir = Dir::load(tmp.path(), &OptionSet::new(), "production").unwrap();
        let (targets, skips) = targets_for_dir(dir, 0, &registry).await;
        assert!(targets.is_empty());
        assert_eq!(skips, 0);
    }

    #[tokio::test]
    async fn test_group_targets_first_seen_order() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), ".push.yaml", "host: db2,db1\nschema: a,b\n");
        let registry = Arc::new(PoolRegistry::new());
        let dir = Dir::load(tmp.path(), &OptionSet::new(), "production").unwrap();
        let (targets, _) = targets_for_dir(dir, 32, &registry).await;
        assert_eq!(targets.len(), 4);

        let groups = group_targets(targets);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].instance.to_string(), "db2:3306");
        let schemas: Vec<&str> = groups[0]
            .targets
            .iter()
            .map(|t| t.schema_name.as_str())
            .collect();
        assert_eq!(schemas, vec!["a", "b"]);
    }
}
