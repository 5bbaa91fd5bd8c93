//! Supplier：向候选供应商询价
//!
//! 先剔除已被违约标记或已联系过的供应商，按信誉分降序排列，取前 max_contacts_per_run 个，
//! 以 supplier_fanout 为并发上限同时联系：先查公开价目，查不到再语音议价。
//! 可用报价不足时在 max_reclusters 次以内回到 Cluster 扩大范围，否则终止。

use std::collections::HashMap;

use async_trait::async_trait;
use futures_util::{stream, StreamExt};

use crate::core::state::{ContactOutcome, NormalizedRequest, RequestState, Stage, SupplierQuote};
use crate::core::PipelineError;
use crate::stages::{require_request, StageContext, StageExecutor, StageOutcome};
use crate::tools::contracts::{
    NegotiationRequest, NegotiationResponse, PriceLookupRequest, PriceLookupResponse, ScoreLookupRequest,
    ScoreLookupResponse, StrikeLookupRequest, StrikeLookupResponse, PRICE_LOOKUP, RELIABILITY_LOOKUP,
    STRIKE_LOOKUP, VOICE_NEGOTIATE,
};

#[derive(Debug, Default, Clone, Copy)]
pub struct SupplierStage;

impl SupplierStage {
    /// 去重后的候选列表（保持簇内顺序）
    fn candidates(state: &RequestState) -> Vec<String> {
        let mut seen = Vec::new();
        for id in state.artisan_clusters.iter().flat_map(|c| c.supplier_ids.iter()) {
            if !state.excluded_suppliers.contains(id) && !seen.contains(id) {
                seen.push(id.clone());
            }
        }
        seen
    }

    async fn rank(state: &RequestState, ctx: &StageContext, candidates: Vec<String>) -> Result<Vec<String>, PipelineError> {
        let strikes: StrikeLookupResponse = ctx
            .gateway
            .call(
                STRIKE_LOOKUP,
                &StrikeLookupRequest {
                    supplier_ids: candidates.clone(),
                },
                &state.idempotency_key("strikes"),
            )
            .await?;
        let mut eligible: Vec<String> = candidates
            .into_iter()
            .filter(|id| {
                let n = strikes.strikes.get(id).copied().unwrap_or(0);
                let flagged = ctx.policy.is_flagged(n);
                if flagged {
                    tracing::info!(request_id = %state.id, supplier = %id, strikes = n, "skipping flagged supplier");
                }
                !flagged
            })
            .collect();

        // 信誉分只影响排序，查询失败时按原顺序继续
        let scores: HashMap<String, f64> = match ctx
            .gateway
            .call::<_, ScoreLookupResponse>(
                RELIABILITY_LOOKUP,
                &ScoreLookupRequest {
                    supplier_ids: eligible.clone(),
                },
                &state.idempotency_key("scores"),
            )
            .await
        {
            Ok(resp) => resp.scores,
            Err(e) => {
                tracing::warn!(request_id = %state.id, error = %e, "reliability lookup failed");
                HashMap::new()
            }
        };
        eligible.sort_by(|a, b| {
            let sa = scores.get(a).copied().unwrap_or(0.0);
            let sb = scores.get(b).copied().unwrap_or(0.0);
            sb.total_cmp(&sa)
        });
        eligible.truncate(ctx.settings.max_contacts_per_run);
        Ok(eligible)
    }

    async fn contact(
        state: &RequestState,
        ctx: &StageContext,
        request: &NormalizedRequest,
        supplier_id: String,
    ) -> SupplierQuote {
        let round = state.recluster_count;
        let lookup = ctx
            .gateway
            .call::<_, PriceLookupResponse>(
                PRICE_LOOKUP,
                &PriceLookupRequest {
                    supplier_id: supplier_id.clone(),
                    item: request.item.clone(),
                    quantity: request.quantity,
                },
                &state.idempotency_key(&format!("price:{supplier_id}")),
            )
            .await;
        match lookup {
            Ok(PriceLookupResponse {
                price: Some(price),
                eta_days: Some(eta),
            }) => {
                return SupplierQuote {
                    supplier_id,
                    price: Some(price),
                    eta_days: Some(eta),
                    contact_outcome: ContactOutcome::WebListed,
                    round,
                }
            }
            Ok(_) => {}
            Err(e) => tracing::debug!(supplier = %supplier_id, error = %e, "price lookup failed, falling back to voice"),
        }

        let negotiation = ctx
            .gateway
            .call::<_, NegotiationResponse>(
                VOICE_NEGOTIATE,
                &NegotiationRequest {
                    supplier_id: supplier_id.clone(),
                    item: request.item.clone(),
                    quantity: request.quantity,
                    target_price: request.budget,
                },
                &state.idempotency_key(&format!("voice:{supplier_id}")),
            )
            .await;
        let (outcome, price, eta_days) = match negotiation {
            Ok(r) if r.accepted => (ContactOutcome::Negotiated, r.price, r.eta_days),
            Ok(r) if r.answered => (ContactOutcome::Declined, None, None),
            Ok(_) => (ContactOutcome::NoAnswer, None, None),
            Err(e) => {
                tracing::info!(supplier = %supplier_id, error = %e, "supplier unreachable");
                (ContactOutcome::Unreachable, None, None)
            }
        };
        SupplierQuote {
            supplier_id,
            price,
            eta_days,
            contact_outcome: outcome,
            round,
        }
    }
}

#[async_trait]
impl StageExecutor for SupplierStage {
    fn stage(&self) -> Stage {
        Stage::Supplier
    }

    async fn run(&self, state: &RequestState, ctx: &StageContext) -> Result<StageOutcome, PipelineError> {
        let request = require_request(state)?;
        let ranked = Self::rank(state, ctx, Self::candidates(state)).await?;

        // 按完成顺序收集：同一供应商以最后完成的联系结果为准
        let contacts: Vec<_> = ranked
            .into_iter()
            .map(|supplier_id| Self::contact(state, ctx, request, supplier_id))
            .collect();
        let quotes: Vec<SupplierQuote> = stream::iter(contacts)
            .buffer_unordered(ctx.settings.supplier_fanout.max(1))
            .collect()
            .await;

        let mut next = state.clone();
        for quote in quotes {
            if !next.excluded_suppliers.contains(&quote.supplier_id) {
                next.excluded_suppliers.push(quote.supplier_id.clone());
            }
            next.upsert_quote(quote);
        }

        let viable = next.viable_quotes().count();
        tracing::info!(
            request_id = %state.id,
            viable,
            contacted = next.supplier_quotes.len(),
            round = state.recluster_count,
            "supplier round finished"
        );
        if viable >= ctx.settings.min_viable_quotes.max(1) {
            return Ok(StageOutcome::advance(next, Stage::Commit));
        }
        if next.recluster_count < ctx.settings.max_reclusters {
            next.recluster_count += 1;
            return Ok(StageOutcome::advance(next, Stage::Cluster));
        }
        Ok(StageOutcome::abort(next, "insufficient_quotes"))
    }
}
