//! Seller payouts: creation on order completion and provider transfers.

use chrono::{TimeDelta, Utc};
use common::{OrderId, PayoutId, SellerId};
use domain::{Money, Order, OrderStatus, Payout, PayoutStatus};
use futures_util::{StreamExt, stream};
use serde::Serialize;
use store::{SettlementStore, StoreError, Version, Versioned};

use crate::config::SettlementConfig;
use crate::error::{ErrorKind, Result, SettlementError};
use crate::services::{Metadata, PaymentGateway, with_timeout};

/// How many due payouts a sweep transfers at once.
const SWEEP_CONCURRENCY: usize = 4;

/// Outcome counts of one [`PayoutProcessor::process_due`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepSummary {
    /// Stale `processing` claims put back in the queue before the run.
    pub reclaimed: usize,
    pub paid: usize,
    pub retrying: usize,
    pub failed: usize,
    /// Payouts left untouched: lost claims, missing accounts, store errors.
    pub skipped: usize,
}

/// Creates and processes seller payouts.
#[derive(Clone)]
pub struct PayoutProcessor<S, G> {
    store: S,
    gateway: G,
    config: SettlementConfig,
}

impl<S, G> PayoutProcessor<S, G>
where
    S: SettlementStore,
    G: PaymentGateway,
{
    pub fn new(store: S, gateway: G, config: SettlementConfig) -> Self {
        Self {
            store,
            gateway,
            config,
        }
    }

    pub async fn get_payout(&self, payout_id: PayoutId) -> Result<Versioned<Payout>> {
        self.store
            .get_payout(payout_id)
            .await?
            .ok_or(SettlementError::PayoutNotFound(payout_id))
    }

    pub async fn payouts_for_order(&self, order_id: OrderId) -> Result<Vec<Versioned<Payout>>> {
        Ok(self.store.payouts_for_order(order_id).await?)
    }

    /// Loads a completed order and creates its payouts.
    pub async fn create_for_order(&self, order_id: OrderId) -> Result<Vec<Versioned<Payout>>> {
        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or(SettlementError::OrderNotFound(order_id))?;
        self.create_for(&order.value).await
    }

    /// Creates one pending payout per seller of a completed order.
    ///
    /// Safe to call again for the same order: payouts that already exist
    /// are kept and returned alongside any that were missing.
    #[tracing::instrument(skip(self, order), fields(order_id = %order.id()))]
    pub async fn create_for(&self, order: &Order) -> Result<Vec<Versioned<Payout>>> {
        if order.status() != OrderStatus::Completed {
            return Err(SettlementError::OrderNotCompleted(order.status()));
        }

        for (seller_id, gross) in seller_shares(order) {
            let payout = Payout::create(
                order.id(),
                seller_id,
                gross,
                order.currency(),
                &self.config.commission,
            )?;

            match self.store.insert_payout(&payout).await {
                Ok(_) => {
                    metrics::counter!("payouts_created_total").increment(1);
                    tracing::info!(
                        payout_id = %payout.id(),
                        seller_id = %seller_id,
                        gross = payout.gross_amount().cents(),
                        commission = payout.commission().cents(),
                        net = payout.net_amount().cents(),
                        "payout created"
                    );
                }
                Err(StoreError::DuplicatePayout { .. }) => {
                    tracing::debug!(seller_id = %seller_id, "payout already exists");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(self.store.payouts_for_order(order.id()).await?)
    }

    /// Transfers a pending or retrying payout to the seller.
    ///
    /// The payout is claimed with a compare-and-set before the provider is
    /// called, so a concurrent processor fails with a conflict instead of
    /// transferring twice. Provider failures are recorded on the payout and
    /// the updated record is returned.
    #[tracing::instrument(skip(self))]
    pub async fn process(&self, payout_id: PayoutId, processed_by: &str) -> Result<Versioned<Payout>> {
        let Versioned {
            value: mut payout,
            version,
        } = self.get_payout(payout_id).await?;

        payout.begin_processing()?;
        let version = self.store.update_payout(&payout, version).await?;

        let destination = match self.store.payout_destination(payout.seller_id()).await {
            Ok(Some(destination)) => destination,
            Ok(None) => return self.missing_account(payout, version).await,
            Err(e) => {
                payout.record_failure(
                    format!("payout account lookup failed: {e}"),
                    true,
                    self.config.payout_max_retries,
                    processed_by,
                )?;
                return self.save(payout, version).await;
            }
        };

        if payout.net_amount().is_zero() {
            payout.mark_paid(None, processed_by)?;
            metrics::counter!("payout_transfers_total", "outcome" => "paid").increment(1);
            return self.save(payout, version).await;
        }

        let metadata = Metadata::from([
            ("payout_id".to_string(), payout.id().to_string()),
            ("order_id".to_string(), payout.order_id().to_string()),
        ]);
        // Keyed by payout so a reclaimed attempt cannot pay the seller twice.
        let idempotency_key = format!("payout:{}", payout.id());
        let transfer = with_timeout(
            self.config.gateway_timeout,
            self.gateway.create_transfer(
                payout.net_amount(),
                payout.currency(),
                &destination,
                &idempotency_key,
                metadata,
            ),
        )
        .await;

        match transfer {
            Ok(transfer) => {
                tracing::info!(
                    order_id = %payout.order_id(),
                    seller_id = %payout.seller_id(),
                    net = payout.net_amount().cents(),
                    transfer_id = %transfer.id,
                    "payout transferred"
                );
                payout.mark_paid(Some(transfer.id), processed_by)?;
            }
            Err(e) => {
                let status = payout.record_failure(
                    e.to_string(),
                    e.is_transient(),
                    self.config.payout_max_retries,
                    processed_by,
                )?;
                if status == PayoutStatus::Failed {
                    tracing::error!(
                        order_id = %payout.order_id(),
                        seller_id = %payout.seller_id(),
                        net = payout.net_amount().cents(),
                        retry_count = payout.retry_count(),
                        error = %e,
                        "payout failed"
                    );
                } else {
                    tracing::warn!(
                        retry_count = payout.retry_count(),
                        error = %e,
                        "payout transfer failed, will retry"
                    );
                }
            }
        }

        metrics::counter!("payout_transfers_total", "outcome" => payout.status().as_str())
            .increment(1);
        self.save(payout, version).await
    }

    /// Operator action: puts a failed payout back in the queue.
    #[tracing::instrument(skip(self))]
    pub async fn requeue(&self, payout_id: PayoutId) -> Result<Versioned<Payout>> {
        let Versioned {
            value: mut payout,
            version,
        } = self.get_payout(payout_id).await?;
        payout.requeue()?;
        tracing::info!("payout requeued");
        self.save(payout, version).await
    }

    /// Releases up to `limit` payouts stuck in `processing` longer than the
    /// configured lease. Returns how many were released.
    ///
    /// A claim is left behind when the process dies mid-transfer or the
    /// outcome could not be stored. Released payouts go back to `retrying`
    /// and are transferred again under the same idempotency key.
    #[tracing::instrument(skip(self))]
    pub async fn reclaim_stale(&self, limit: usize) -> Result<usize> {
        let lease = self.config.payout_processing_lease;
        let Some(cutoff) = TimeDelta::from_std(lease)
            .ok()
            .and_then(|lease| Utc::now().checked_sub_signed(lease))
        else {
            return Ok(0);
        };

        let mut reclaimed = 0;
        for Versioned { value: mut payout, version } in
            self.store.stale_processing_payouts(cutoff, limit).await?
        {
            if !payout.is_claim_stale(cutoff) {
                continue;
            }
            let status = payout.release_stale_claim(
                format!("processing claim expired after {}s", lease.as_secs()),
                self.config.payout_max_retries,
            )?;

            match self.store.update_payout(&payout, version).await {
                Ok(_) => {
                    reclaimed += 1;
                    metrics::counter!("payouts_reclaimed_total").increment(1);
                    tracing::warn!(
                        payout_id = %payout.id(),
                        order_id = %payout.order_id(),
                        retry_count = payout.retry_count(),
                        status = %status,
                        "stale payout claim released"
                    );
                }
                Err(StoreError::ConcurrencyConflict { .. }) => {
                    tracing::debug!(payout_id = %payout.id(), "stale claim resolved concurrently");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(reclaimed)
    }

    /// Reclaims stale claims, then processes up to `limit` pending or
    /// retrying payouts.
    #[tracing::instrument(skip(self))]
    pub async fn process_due(&self, limit: usize, processed_by: &str) -> Result<SweepSummary> {
        let reclaimed = self.reclaim_stale(limit).await?;
        let due = self.store.due_payouts(limit).await?;

        let results: Vec<Result<Versioned<Payout>>> = stream::iter(due)
            .map(|payout| self.process(payout.value.id(), processed_by))
            .buffer_unordered(SWEEP_CONCURRENCY)
            .collect()
            .await;

        let mut summary = SweepSummary {
            reclaimed,
            ..SweepSummary::default()
        };
        for result in results {
            match result {
                Ok(payout) => match payout.value.status() {
                    PayoutStatus::Paid => summary.paid += 1,
                    PayoutStatus::Retrying => summary.retrying += 1,
                    PayoutStatus::Failed => summary.failed += 1,
                    PayoutStatus::Pending | PayoutStatus::Processing => summary.skipped += 1,
                },
                Err(e) => {
                    summary.skipped += 1;
                    if e.kind() == ErrorKind::Internal {
                        tracing::error!(error = %e, "payout sweep entry failed");
                    }
                }
            }
        }

        tracing::info!(
            reclaimed = summary.reclaimed,
            paid = summary.paid,
            retrying = summary.retrying,
            failed = summary.failed,
            skipped = summary.skipped,
            "payout sweep finished"
        );
        Ok(summary)
    }

    async fn missing_account(&self, mut payout: Payout, version: Version) -> Result<Versioned<Payout>> {
        let err = SettlementError::MissingPayoutAccount {
            seller_id: payout.seller_id(),
        };
        payout.return_to_pending(err.to_string())?;
        self.store.update_payout(&payout, version).await?;

        metrics::counter!("payout_transfers_total", "outcome" => "missing_account").increment(1);
        tracing::warn!(
            order_id = %payout.order_id(),
            seller_id = %payout.seller_id(),
            net = payout.net_amount().cents(),
            "seller has no payout account"
        );
        Err(err)
    }

    async fn save(&self, payout: Payout, expected: Version) -> Result<Versioned<Payout>> {
        match self.store.update_payout(&payout, expected).await {
            Ok(version) => Ok(Versioned::new(payout, version)),
            Err(e) => {
                tracing::error!(
                    payout_id = %payout.id(),
                    status = %payout.status(),
                    transfer_id = ?payout.provider_transfer_id(),
                    error = %e,
                    "failed to record payout outcome"
                );
                Err(e.into())
            }
        }
    }
}

/// Splits an order's total by seller, in order of first appearance.
///
/// Shipping is attributed to the seller of the first line item, so the
/// shares always sum to the order total.
fn seller_shares(order: &Order) -> Vec<(SellerId, Money)> {
    let mut shares: Vec<(SellerId, Money)> = Vec::new();
    for item in order.items() {
        match shares.iter_mut().find(|(seller_id, _)| *seller_id == item.seller_id) {
            Some((_, gross)) => *gross += item.total_price(),
            None => shares.push((item.seller_id, item.total_price())),
        }
    }
    if let Some((_, gross)) = shares.first_mut() {
        *gross += order.shipping();
    }
    shares
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::services::InMemoryPaymentGateway;
    use common::BuyerId;
    use domain::{LineItem, NewOrder, OrderSource, ShippingAddress};
    use store::{InMemoryStore, OrderStore, PayoutStore};

    fn paid_order(items: Vec<LineItem>, shipping: Money) -> Order {
        let mut order = Order::place(NewOrder {
            buyer_id: BuyerId::new(),
            items,
            shipping,
            currency: "usd".to_string(),
            shipping_address: ShippingAddress {
                recipient: "Ada".to_string(),
                line1: "1 Main St".to_string(),
                city: "Springfield".to_string(),
                postal_code: "12345".to_string(),
                country: "US".to_string(),
                ..Default::default()
            },
            source: OrderSource::Product,
        })
        .unwrap();
        order.attach_payment_intent("pi_1", "secret").unwrap();
        order.mark_paid("pi_1").unwrap();
        order
    }

    fn fulfil(mut order: Order) -> Order {
        let seller_id = order.items()[0].seller_id;
        order.confirm(seller_id).unwrap();
        order.ship(seller_id, None).unwrap();
        order.mark_delivered(seller_id).unwrap();
        order.confirm_receipt(order.buyer_id()).unwrap();
        order
    }

    #[test]
    fn test_shipping_goes_to_first_seller() {
        let first = SellerId::new();
        let second = SellerId::new();
        let order = fulfil(paid_order(
            vec![
                LineItem::new("A", first, "A", 2, Money::from_cents(1000)),
                LineItem::new("B", second, "B", 1, Money::from_cents(3000)),
                LineItem::new("C", first, "C", 1, Money::from_cents(500)),
            ],
            Money::from_cents(700),
        ));

        let shares = seller_shares(&order);

        assert_eq!(
            shares,
            vec![
                (first, Money::from_cents(2500 + 700)),
                (second, Money::from_cents(3000)),
            ]
        );
        let sum: Money = shares.iter().map(|(_, gross)| *gross).sum();
        assert_eq!(sum, order.total());
    }

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let store = InMemoryStore::new();
        let processor = PayoutProcessor::new(
            store.clone(),
            InMemoryPaymentGateway::new(),
            SettlementConfig::default(),
        );
        let seller_id = SellerId::new();
        let order = fulfil(paid_order(
            vec![LineItem::new("A", seller_id, "A", 1, Money::from_units(1000))],
            Money::zero(),
        ));
        store.insert_order(&order).await.unwrap();

        let first = processor.create_for_order(order.id()).await.unwrap();
        let second = processor.create_for_order(order.id()).await.unwrap();

        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_eq!(first[0].value.id(), second[0].value.id());
        assert_eq!(first[0].value.commission(), Money::from_units(100));
        assert_eq!(first[0].value.net_amount(), Money::from_units(900));
    }

    #[tokio::test]
    async fn test_zero_net_payout_skips_provider() {
        let store = InMemoryStore::new();
        let gateway = InMemoryPaymentGateway::new();
        let processor =
            PayoutProcessor::new(store.clone(), gateway.clone(), SettlementConfig::default());
        let seller_id = SellerId::new();
        store.set_payout_destination(seller_id, "acct_1").await;

        let payout = Payout::create(
            OrderId::new(),
            seller_id,
            Money::zero(),
            "usd",
            &SettlementConfig::default().commission,
        )
        .unwrap();
        store.insert_payout(&payout).await.unwrap();

        let processed = processor.process(payout.id(), "scheduler").await.unwrap();

        assert_eq!(processed.value.status(), PayoutStatus::Paid);
        assert_eq!(processed.value.provider_transfer_id(), None);
        assert!(gateway.transfers().is_empty());
    }

    fn pending_payout(seller_id: SellerId) -> Payout {
        Payout::create(
            OrderId::new(),
            seller_id,
            Money::from_cents(1000),
            "usd",
            &SettlementConfig::default().commission,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_lost_outcome_is_reclaimed_without_paying_twice() {
        let store = InMemoryStore::new();
        let gateway = InMemoryPaymentGateway::new();
        let config = SettlementConfig {
            payout_processing_lease: Duration::ZERO,
            ..SettlementConfig::default()
        };
        let processor = PayoutProcessor::new(store.clone(), gateway.clone(), config);
        let seller_id = SellerId::new();
        store.set_payout_destination(seller_id, "acct_1").await;
        let payout = pending_payout(seller_id);
        store.insert_payout(&payout).await.unwrap();

        // The claim is stored, the transfer outcome is not.
        store.fail_payout_updates_after(Some(1));
        let result = processor.process(payout.id(), "scheduler").await;
        assert!(matches!(
            result,
            Err(SettlementError::Store(StoreError::Unavailable(_)))
        ));
        let stuck = processor.get_payout(payout.id()).await.unwrap();
        assert_eq!(stuck.value.status(), PayoutStatus::Processing);
        assert_eq!(gateway.transfers().len(), 1);
        store.fail_payout_updates_after(None);

        let summary = processor.process_due(10, "sweeper").await.unwrap();

        assert_eq!(summary.reclaimed, 1);
        assert_eq!(summary.paid, 1);
        let paid = processor.get_payout(payout.id()).await.unwrap();
        assert_eq!(paid.value.status(), PayoutStatus::Paid);
        assert_eq!(paid.value.retry_count(), 1);
        assert_eq!(gateway.transfers().len(), 1);
        assert_eq!(
            paid.value.provider_transfer_id(),
            Some(gateway.transfers()[0].id.as_str())
        );
    }

    #[tokio::test]
    async fn test_claim_within_lease_is_left_alone() {
        let store = InMemoryStore::new();
        let processor = PayoutProcessor::new(
            store.clone(),
            InMemoryPaymentGateway::new(),
            SettlementConfig::default(),
        );
        // No destination: the claim is handed back, but that write fails.
        let payout = pending_payout(SellerId::new());
        store.insert_payout(&payout).await.unwrap();
        store.fail_payout_updates_after(Some(1));
        assert!(processor.process(payout.id(), "scheduler").await.is_err());
        store.fail_payout_updates_after(None);

        let summary = processor.process_due(10, "sweeper").await.unwrap();

        assert_eq!(summary, SweepSummary::default());
        let stored = processor.get_payout(payout.id()).await.unwrap();
        assert_eq!(stored.value.status(), PayoutStatus::Processing);
        assert_eq!(processor.reclaim_stale(10).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_paid_order_has_no_payouts() {
        let store = InMemoryStore::new();
        let processor =
            PayoutProcessor::new(store, InMemoryPaymentGateway::new(), SettlementConfig::default());
        let order = paid_order(
            vec![
                LineItem::new("A", SellerId::new(), "A", 1, Money::from_cents(100)),
                LineItem::new("B", SellerId::new(), "B", 1, Money::from_cents(100)),
            ],
            Money::zero(),
        );

        assert!(matches!(
            processor.create_for(&order).await,
            Err(SettlementError::OrderNotCompleted(OrderStatus::Paid))
        ));
    }
}
