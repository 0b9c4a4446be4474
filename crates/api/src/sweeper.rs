//! Background payout sweep.

use std::time::Duration;

use settlement::{InMemoryPaymentGateway, PayoutProcessor};
use store::SettlementStore;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

const SWEEPER_IDENTITY: &str = "system:payout-sweeper";

/// Spawns a task that processes due payouts every `interval`.
///
/// Each sweep first releases payouts stuck in `processing` past their
/// lease. A failed sweep is logged and retried on the next tick. The task runs
/// until aborted.
pub fn spawn<S: SettlementStore>(
    payouts: PayoutProcessor<S, InMemoryPaymentGateway>,
    interval: Duration,
    batch: usize,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(
            interval_secs = interval.as_secs(),
            batch,
            "starting payout sweeper"
        );

        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match payouts.process_due(batch, SWEEPER_IDENTITY).await {
                Ok(summary) => {
                    metrics::counter!("payout_sweeps_total", "outcome" => "ok").increment(1);
                    let touched = summary.reclaimed
                        + summary.paid
                        + summary.retrying
                        + summary.failed
                        + summary.skipped;
                    if touched > 0 {
                        tracing::info!(
                            reclaimed = summary.reclaimed,
                            paid = summary.paid,
                            retrying = summary.retrying,
                            failed = summary.failed,
                            skipped = summary.skipped,
                            "payout sweep finished"
                        );
                    }
                }
                Err(e) => {
                    metrics::counter!("payout_sweeps_total", "outcome" => "error").increment(1);
                    tracing::error!(error = %e, "payout sweep failed");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{BuyerId, SellerId};
    use domain::{LineItem, Money, NewOrder, Order, OrderSource, Payout, PayoutStatus, ShippingAddress};
    use settlement::SettlementConfig;
    use store::{InMemoryStore, OrderStore, PayoutStore};

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_pays_due_payouts() {
        let store = InMemoryStore::new();
        let gateway = InMemoryPaymentGateway::new();
        let seller_id = SellerId::new();
        store.set_payout_destination(seller_id, "acct_seller").await;

        let order = Order::place(NewOrder {
            buyer_id: BuyerId::new(),
            items: vec![LineItem::new("A", seller_id, "Lamp", 1, Money::from_cents(1000))],
            shipping: Money::zero(),
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
        store.insert_order(&order).await.unwrap();

        let config = SettlementConfig::default();
        let payout = Payout::create(
            order.id(),
            seller_id,
            Money::from_cents(1000),
            "usd",
            &config.commission,
        )
        .unwrap();
        store.insert_payout(&payout).await.unwrap();

        let processor = PayoutProcessor::new(store.clone(), gateway.clone(), config);
        let handle = spawn(processor, Duration::from_secs(30), 10);

        // The first tick fires immediately; give the sweep time to finish.
        time::sleep(Duration::from_millis(10)).await;
        handle.abort();

        let stored = store.get_payout(payout.id()).await.unwrap().unwrap();
        assert_eq!(stored.value.status(), PayoutStatus::Paid);
        assert_eq!(stored.value.processed_by(), Some(SWEEPER_IDENTITY));
        assert_eq!(gateway.transfers().len(), 1);
    }
}
