//! Datasource router.

use crate::error::{RoutingError, RoutingResult};
use crate::role::{CqrsMode, Role};
use std::future::Future;
use waybill_log::{debug, info, warn};

/// Routes each call to the read or write connection for its declared role.
///
/// `P` is whatever represents a physical connection: a pool, a client, or a
/// plain URL in tests. When only one connection exists, both roles resolve to
/// it; when both exist, unknown routing falls back to write.
#[derive(Debug, Clone)]
pub struct DataSourceRouter<P> {
    mode: CqrsMode,
    write: Option<P>,
    read: Option<P>,
}

impl<P> DataSourceRouter<P> {
    /// Build a router from the connections a deployment has.
    ///
    /// Connections the mode does not provision are dropped. Fails with
    /// [`RoutingError::NoDataSource`] when nothing is left.
    pub fn new(mode: CqrsMode, write: Option<P>, read: Option<P>) -> RoutingResult<Self> {
        let write = Self::keep(mode, Role::Write, write);
        let read = Self::keep(mode, Role::Read, read);

        if write.is_none() && read.is_none() {
            return Err(RoutingError::NoDataSource { mode });
        }

        info!(
            { "mode" => mode, "write" => write.is_some(), "read" => read.is_some() },
            "Datasource router ready"
        );

        Ok(Self { mode, write, read })
    }

    fn keep(mode: CqrsMode, role: Role, connection: Option<P>) -> Option<P> {
        match connection {
            Some(_) if !mode.provisions(role) => {
                warn!(
                    { "mode" => mode, "role" => role },
                    "Ignoring datasource not provisioned by the current mode"
                );
                None
            }
            other => other,
        }
    }

    /// Router with a single write connection.
    pub fn write_only(write: P) -> Self {
        Self {
            mode: CqrsMode::Write,
            write: Some(write),
            read: None,
        }
    }

    /// Call the factory once per role the mode provisions and build the router.
    pub async fn provision<F, Fut, E>(mode: CqrsMode, mut factory: F) -> RoutingResult<Self>
    where
        F: FnMut(Role) -> Fut,
        Fut: Future<Output = Result<P, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let mut write = None;
        let mut read = None;

        for role in [Role::Write, Role::Read] {
            if !mode.provisions(role) {
                continue;
            }
            debug!({ "role" => role }, "Provisioning datasource");
            let connection = factory(role)
                .await
                .map_err(|e| RoutingError::Provision {
                    role,
                    source: Box::new(e),
                })?;
            match role {
                Role::Write => write = Some(connection),
                Role::Read => read = Some(connection),
            }
        }

        Self::new(mode, write, read)
    }

    /// Operating mode.
    pub fn mode(&self) -> CqrsMode {
        self.mode
    }

    /// Connection for `role`, falling back to the default target when the
    /// role has no connection of its own.
    pub fn resolve(&self, role: Role) -> &P {
        let preferred = match role {
            Role::Write => self.write.as_ref(),
            Role::Read => self.read.as_ref(),
        };
        preferred.unwrap_or_else(|| self.default_target())
    }

    /// Write if present, otherwise read.
    pub fn default_target(&self) -> &P {
        match (&self.write, &self.read) {
            (Some(write), _) => write,
            (None, Some(read)) => read,
            // `new` and `provision` refuse to build a router without a connection
            (None, None) => unreachable!("router constructed without a datasource"),
        }
    }

    /// Whether `role` has its own connection.
    pub fn supports(&self, role: Role) -> bool {
        match role {
            Role::Write => self.write.is_some(),
            Role::Read => self.read.is_some(),
        }
    }

    /// Apply `f` to every connection, keeping the mode.
    pub fn map<Q>(self, mut f: impl FnMut(P) -> Q) -> DataSourceRouter<Q> {
        DataSourceRouter {
            mode: self.mode,
            write: self.write.map(&mut f),
            read: self.read.map(&mut f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    #[derive(Debug, thiserror::Error)]
    #[error("connection refused")]
    struct Refused;

    #[test]
    fn test_both_routes_by_role() {
        let router = assert_ok!(DataSourceRouter::new(
            CqrsMode::Both,
            Some("primary"),
            Some("replica")
        ));

        assert_eq!(*router.resolve(Role::Read), "replica");
        assert_eq!(*router.resolve(Role::Write), "primary");
        assert_eq!(*router.default_target(), "primary");
    }

    #[test]
    fn test_write_mode_serves_reads_from_write() {
        let router = assert_ok!(DataSourceRouter::new(CqrsMode::Write, Some("primary"), None));

        assert_eq!(*router.resolve(Role::Read), "primary");
        assert_eq!(*router.resolve(Role::Write), "primary");
        assert!(router.supports(Role::Write));
        assert!(!router.supports(Role::Read));
    }

    #[test]
    fn test_read_mode_has_no_write_support() {
        let router = assert_ok!(DataSourceRouter::new(CqrsMode::Read, None, Some("replica")));

        assert_eq!(*router.resolve(Role::Write), "replica");
        assert!(!router.supports(Role::Write));
    }

    #[test]
    fn test_no_datasource_is_fatal() {
        let result = DataSourceRouter::<&str>::new(CqrsMode::Both, None, None);
        assert!(matches!(
            result,
            Err(RoutingError::NoDataSource {
                mode: CqrsMode::Both
            })
        ));
    }

    #[test]
    fn test_unprovisioned_connection_is_dropped() {
        let result = DataSourceRouter::new(CqrsMode::Read, Some("primary"), None);
        assert!(matches!(result, Err(RoutingError::NoDataSource { .. })));
    }

    #[test]
    fn test_map_keeps_layout() {
        let router = DataSourceRouter::write_only("postgres://primary").map(|url| url.len());
        assert_eq!(*router.resolve(Role::Read), "postgres://primary".len());
        assert_eq!(router.mode(), CqrsMode::Write);
    }

    #[tokio::test]
    async fn test_provision_only_requested_roles() {
        let mut calls = Vec::new();
        let router = DataSourceRouter::provision(CqrsMode::Write, |role| {
            calls.push(role);
            async move { Ok::<_, Refused>(format!("{}-pool", role)) }
        })
        .await
        .unwrap();

        assert_eq!(calls, vec![Role::Write]);
        assert_eq!(router.resolve(Role::Read), "write-pool");
    }

    #[tokio::test]
    async fn test_provision_failure_names_role() {
        let result = DataSourceRouter::<String>::provision(CqrsMode::Both, |role| async move {
            match role {
                Role::Write => Ok("write-pool".to_string()),
                Role::Read => Err(Refused),
            }
        })
        .await;

        assert!(matches!(
            result,
            Err(RoutingError::Provision {
                role: Role::Read,
                ..
            })
        ));
    }
}
