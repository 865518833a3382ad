//! Output repositories of a run and the bound on running sinks.
//!
//! A declared repository is either [`Repository::Direct`], owning a
//! [`BranchLedger`], or [`Repository::Forwarding`], which writes into another
//! repository under a path prefix. Every lookup goes through
//! [`Registry::resolve`] so callers only ever touch direct ledgers.

pub mod cache;

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::ExportOptions;
use crate::errors::{CoreError, LedgerError, RuleError};
use crate::fastimport::SinkFactory;
use crate::ledger::{BranchLedger, MergePolicy};
use crate::rules::{RepositoryDecl, RuleFile};

pub use cache::SinkCache;

/// Forwarding chains longer than this are assumed to be cyclic.
const MAX_FORWARD_DEPTH: usize = 32;

/// A declared output repository.
#[derive(Debug)]
pub enum Repository {
    Direct(Box<BranchLedger>),
    Forwarding { target: String, prefix: String },
}

/// Where writes to a repository name really go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    /// The direct repository at the end of the forwarding chain.
    pub repository: String,
    /// Prefix prepended to every path, innermost forward last.
    pub prefix: String,
}

/// Every repository of the run.
#[derive(Debug)]
pub struct Registry {
    repositories: BTreeMap<String, Repository>,
    /// Direct repositories in declaration order.
    direct: Vec<String>,
    cache: SinkCache,
}

impl Registry {
    /// Build the registry from the declarations of every rules file.
    ///
    /// Direct repositories are prepared through `factory` (a bare repository
    /// is initialised in fast-import mode). A declaration repeated in a later
    /// file is ignored.
    pub async fn declare(
        files: &[RuleFile],
        options: Arc<ExportOptions>,
        factory: Arc<dyn SinkFactory>,
        merge_policy: Arc<dyn MergePolicy>,
        max_sinks: usize,
    ) -> Result<Self, CoreError> {
        let mut registry = Self {
            repositories: BTreeMap::new(),
            direct: Vec::new(),
            cache: SinkCache::new(max_sinks),
        };

        for decl in files.iter().flat_map(|f| f.repositories.iter()) {
            if registry.repositories.contains_key(&decl.name) {
                warn!(repository = %decl.name, location = %decl.location(), "repository declared twice, keeping the first declaration");
                continue;
            }
            registry.insert(decl, &options, &factory, &merge_policy).await?;
        }

        for (name, repo) in &registry.repositories {
            if let Repository::Forwarding { target, .. } = repo {
                if registry.resolve(name).is_none() {
                    return Err(RuleError::UnknownForwardTarget {
                        name: name.clone(),
                        target: target.clone(),
                    }
                    .into());
                }
            }
        }

        registry.check_rules(files)?;
        info!(
            repositories = registry.repositories.len(),
            direct = registry.direct.len(),
            "repositories declared"
        );
        Ok(registry)
    }

    async fn insert(
        &mut self,
        decl: &RepositoryDecl,
        options: &Arc<ExportOptions>,
        factory: &Arc<dyn SinkFactory>,
        merge_policy: &Arc<dyn MergePolicy>,
    ) -> Result<(), CoreError> {
        if decl.is_forwarding() {
            if !decl.branches.is_empty() || !decl.description.is_empty() {
                return Err(RuleError::ContradictoryRepository {
                    name: decl.name.clone(),
                    target: decl.forward_to.clone(),
                    location: decl.location(),
                }
                .into());
            }
            debug!(repository = %decl.name, target = %decl.forward_to, prefix = %decl.prefix, "forwarding repository");
            self.repositories.insert(
                decl.name.clone(),
                Repository::Forwarding {
                    target: decl.forward_to.clone(),
                    prefix: decl.prefix.clone(),
                },
            );
            return Ok(());
        }

        factory.prepare(&decl.name, &decl.description).await?;
        let ledger = BranchLedger::new(
            decl.name.clone(),
            &decl.branches,
            Arc::clone(options),
            Arc::clone(factory),
            Arc::clone(merge_policy),
        );
        debug!(repository = %decl.name, branches = decl.branches.len(), "direct repository");
        self.repositories
            .insert(decl.name.clone(), Repository::Direct(Box::new(ledger)));
        self.direct.push(decl.name.clone());
        Ok(())
    }

    /// Every literal repository name a rule can produce must be declared.
    fn check_rules(&self, files: &[RuleFile]) -> Result<(), RuleError> {
        for rule in files.iter().flat_map(|f| f.rules.iter()) {
            if rule.repository.is_empty() || rule.repository_is_templated() {
                continue;
            }
            if !rule.repository_substitutions.is_empty() {
                continue;
            }
            if !self.repositories.contains_key(&rule.repository) {
                return Err(RuleError::UnknownRepository {
                    rule: rule.info(),
                    repository: rule.repository.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.repositories.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Repository> {
        self.repositories.get(name)
    }

    /// Follow forwards from `name` to its direct repository.
    pub fn resolve(&self, name: &str) -> Option<Resolved> {
        let mut current = name;
        let mut prefix = String::new();
        for _ in 0..MAX_FORWARD_DEPTH {
            match self.repositories.get(current)? {
                Repository::Direct(_) => {
                    return Some(Resolved {
                        repository: current.to_string(),
                        prefix,
                    })
                }
                Repository::Forwarding { target, prefix: own } => {
                    prefix = format!("{own}{prefix}");
                    current = target;
                }
            }
        }
        warn!(repository = name, "forwarding chain does not end in a direct repository");
        None
    }

    /// The direct repository `name` writes into.
    pub fn effective(&self, name: &str) -> Option<String> {
        self.resolve(name).map(|r| r.repository)
    }

    /// Whether writes to `name` are rewritten under a path prefix.
    pub fn has_prefix(&self, name: &str) -> bool {
        self.resolve(name).is_some_and(|r| !r.prefix.is_empty())
    }

    /// Names of the direct repositories, in declaration order.
    pub fn direct_names(&self) -> &[String] {
        &self.direct
    }

    /// Read access to a direct ledger; does not count as use.
    pub fn ledger_ref(&self, name: &str) -> Option<&BranchLedger> {
        match self.repositories.get(name)? {
            Repository::Direct(ledger) => Some(&**ledger),
            Repository::Forwarding { .. } => None,
        }
    }

    /// Write access to a direct ledger. The repository becomes the most
    /// recently used one; repositories that fall out of the sink cache have
    /// their sinks closed first.
    pub async fn ledger(&mut self, name: &str) -> Result<&mut BranchLedger, LedgerError> {
        if self.ledger_ref(name).is_none() {
            return Err(LedgerError::NoSuchRepository(name.to_string()));
        }

        for evicted in self.cache.touch(name) {
            if let Some(Repository::Direct(ledger)) = self.repositories.get_mut(&evicted) {
                if ledger.is_open() {
                    debug!(repository = %evicted, "closing least recently used sink");
                    ledger.close().await?;
                }
            }
        }

        match self.repositories.get_mut(name) {
            Some(Repository::Direct(ledger)) => Ok(&mut **ledger),
            _ => Err(LedgerError::NoSuchRepository(name.to_string())),
        }
    }

    /// Write buffered branch deletions and resets of every repository.
    pub async fn flush_pending(&mut self) -> Result<(), LedgerError> {
        for name in self.direct.clone() {
            let pending = self.ledger_ref(&name).is_some_and(BranchLedger::has_pending);
            if pending {
                self.ledger(&name).await?.flush_pending().await?;
            }
        }
        Ok(())
    }

    /// Emit the queued annotated tags of every repository.
    pub async fn finalize_tags(&mut self) -> Result<(), LedgerError> {
        for name in self.direct.clone() {
            let queued = self.ledger_ref(&name).is_some_and(|l| !l.tags().is_empty());
            if queued {
                self.ledger(&name).await?.finalize_tags().await?;
            }
        }
        Ok(())
    }

    /// Close every sink and check that no transaction was left open.
    pub async fn close_all(&mut self) -> Result<(), LedgerError> {
        for name in &self.direct {
            if let Some(Repository::Direct(ledger)) = self.repositories.get_mut(name) {
                ledger.close().await?;
                self.cache.remove(name);
            }
        }
        for name in &self.direct {
            if let Some(ledger) = self.ledger_ref(name) {
                ledger.ensure_idle()?;
            }
        }
        Ok(())
    }

    /// Number of sinks currently counted as running.
    pub fn open_sinks(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutputMode;
    use crate::fastimport::FileSinkFactory;
    use crate::ledger::SignatureMergePolicy;

    const RULES: &str = "\
create repository kde
  branch stable
end repository

create repository kdelibs
  repository kde
  prefix libs/
end repository

create repository kdelibs-doc
  repository kdelibs
  prefix doc/
end repository

match /trunk/kdelibs/
  repository kdelibs
  branch master
end match
";

    async fn registry(dir: &std::path::Path, text: &str, max_sinks: usize) -> Result<Registry, CoreError> {
        let file = RuleFile::parse_str("test.rules", text)?;
        Registry::declare(
            &[file],
            Arc::new(ExportOptions::default()),
            Arc::new(FileSinkFactory::new(dir, OutputMode::Dump)),
            Arc::new(SignatureMergePolicy::default()),
            max_sinks,
        )
        .await
    }

    #[tokio::test]
    async fn test_forwarding_resolves_to_direct() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path(), RULES, 4).await.unwrap();

        assert_eq!(registry.direct_names(), &["kde".to_string()]);
        let resolved = registry.resolve("kdelibs-doc").unwrap();
        assert_eq!(resolved.repository, "kde");
        assert_eq!(resolved.prefix, "libs/doc/");
        assert_eq!(registry.effective("kde").as_deref(), Some("kde"));
        assert!(registry.has_prefix("kdelibs"));
        assert!(!registry.has_prefix("kde"));
        assert!(registry.resolve("nowhere").is_none());
        assert!(registry.ledger_ref("kdelibs").is_none());
        assert!(registry.ledger_ref("kde").unwrap().branch_exists("stable"));
    }

    #[tokio::test]
    async fn test_unknown_forward_target() {
        let dir = tempfile::tempdir().unwrap();
        let text = "create repository a\n  repository missing\nend repository\n";
        let err = registry(dir.path(), text, 4).await.unwrap_err();
        assert!(matches!(err, CoreError::Rules(RuleError::UnknownForwardTarget { .. })));
    }

    #[tokio::test]
    async fn test_rule_with_undeclared_repository() {
        let dir = tempfile::tempdir().unwrap();
        let text = "create repository a\nend repository\nmatch /trunk/\n  repository b\nend match\n";
        let err = registry(dir.path(), text, 4).await.unwrap_err();
        assert!(matches!(err, CoreError::Rules(RuleError::UnknownRepository { .. })));
    }

    #[tokio::test]
    async fn test_templated_repository_is_not_checked() {
        let dir = tempfile::tempdir().unwrap();
        let text = "create repository a\nend repository\nmatch /([^/]+)/trunk/\n  repository \\1\nend match\n";
        assert!(registry(dir.path(), text, 4).await.is_ok());
    }

    #[tokio::test]
    async fn test_forwarding_cycle_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let text = "\
create repository a
  repository b
end repository
create repository b
  repository a
end repository
";
        let err = registry(dir.path(), text, 4).await.unwrap_err();
        assert!(matches!(err, CoreError::Rules(RuleError::UnknownForwardTarget { .. })));
    }

    #[tokio::test]
    async fn test_eviction_closes_least_recent_sink() {
        let dir = tempfile::tempdir().unwrap();
        let text = "\
create repository a
end repository
create repository b
end repository
create repository c
end repository
";
        let mut registry = registry(dir.path(), text, 2).await.unwrap();
        registry.ledger("a").await.unwrap().checkpoint().await.unwrap();
        registry.ledger("b").await.unwrap().checkpoint().await.unwrap();
        assert!(registry.ledger_ref("a").unwrap().is_open());

        registry.ledger("c").await.unwrap().checkpoint().await.unwrap();
        assert!(!registry.ledger_ref("a").unwrap().is_open());
        assert!(registry.ledger_ref("b").unwrap().is_open());
        assert_eq!(registry.open_sinks(), 2);

        // the evicted stream was checkpointed on close
        let a = std::fs::read_to_string(dir.path().join("a.fi")).unwrap();
        assert_eq!(a.matches("checkpoint").count(), 2);

        registry.close_all().await.unwrap();
        assert_eq!(registry.open_sinks(), 0);
        assert!(!registry.ledger_ref("b").unwrap().is_open());
    }

    #[tokio::test]
    async fn test_ledger_of_forwarding_name_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = registry(dir.path(), RULES, 4).await.unwrap();
        assert!(matches!(
            registry.ledger("kdelibs").await,
            Err(LedgerError::NoSuchRepository(_))
        ));
    }
}
