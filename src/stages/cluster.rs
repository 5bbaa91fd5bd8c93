//! Cluster：按地点与半径查找候选手工艺人簇；每次重新聚类半径按 base * (n + 1) 扩大，并排除已联系过的供应商
//!
//! 首轮找不到供应商以 `no_suppliers_in_range` 终止；重新聚类轮次找不到新供应商以 `insufficient_quotes` 终止。

use async_trait::async_trait;

use crate::core::state::{ArtisanCluster, RequestState, Stage};
use crate::core::PipelineError;
use crate::stages::{require_request, StageContext, StageExecutor, StageOutcome};
use crate::tools::contracts::{ClusterRequest, ClusterResponse, GEOCLUSTER};

#[derive(Debug, Default, Clone, Copy)]
pub struct ClusterStage;

impl ClusterStage {
    pub fn radius_km(base_radius_km: f64, recluster_count: u32) -> f64 {
        base_radius_km * f64::from(recluster_count + 1)
    }
}

#[async_trait]
impl StageExecutor for ClusterStage {
    fn stage(&self) -> Stage {
        Stage::Cluster
    }

    async fn run(&self, state: &RequestState, ctx: &StageContext) -> Result<StageOutcome, PipelineError> {
        let request = require_request(state)?;
        let radius_km = Self::radius_km(ctx.settings.base_radius_km, state.recluster_count);
        let query = ClusterRequest {
            location: request.location.clone(),
            item: request.item.clone(),
            radius_km,
            exclude: state.excluded_suppliers.clone(),
        };
        let response: ClusterResponse = ctx
            .gateway
            .call(GEOCLUSTER, &query, &state.idempotency_key("geocluster"))
            .await?;

        let clusters: Vec<ArtisanCluster> = response
            .clusters
            .into_iter()
            .map(|g| ArtisanCluster {
                cluster_id: g.cluster_id,
                supplier_ids: g
                    .supplier_ids
                    .into_iter()
                    .filter(|id| !state.excluded_suppliers.contains(id))
                    .collect(),
                centroid: g.centroid,
            })
            .filter(|c| !c.supplier_ids.is_empty())
            .collect();

        if clusters.is_empty() {
            // 重新聚类轮次：范围内的供应商都已联系过，失败原因仍是报价不足
            let reason = if state.recluster_count > 0 {
                "insufficient_quotes"
            } else {
                "no_suppliers_in_range"
            };
            tracing::info!(request_id = %state.id, radius_km, round = state.recluster_count, reason, "no new suppliers in range");
            return Ok(StageOutcome::abort(state.clone(), reason));
        }
        tracing::info!(
            request_id = %state.id,
            radius_km,
            clusters = clusters.len(),
            round = state.recluster_count,
            "artisan clusters found"
        );

        let mut next = state.clone();
        next.artisan_clusters = clusters;
        Ok(StageOutcome::advance(next, Stage::Supplier))
    }
}
