//! Routed pools: one PostgreSQL pool per provisioned role.

use crate::{DataSourceConfig, DieselError, DieselResult, PgPool};
use waybill_cqrs::DataSourceRouter;
use waybill_log::info;

/// Router over PostgreSQL pools.
pub type RoutedPool = DataSourceRouter<PgPool>;

/// Create a pool for every datasource the configured mode provisions.
///
/// Fails when the mode asks for a datasource that has no configuration, or
/// when no datasource is left at all.
pub async fn connect_routed(config: &DataSourceConfig) -> DieselResult<RoutedPool> {
    config.validate()?;

    let router = DataSourceRouter::provision(config.mode, |role| {
        let pool_config = config.for_role(role).cloned();
        async move {
            let pool_config = pool_config.ok_or_else(|| {
                DieselError::Config(format!("no {} datasource configured", role))
            })?;
            PgPool::new(pool_config).await
        }
    })
    .await?;

    info!({ "mode" => config.mode }, "Routed PostgreSQL pools ready");
    Ok(router)
}
