pub mod fees;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clients::bus::EventPublisher;
use crate::clients::gateway::{CreateIntentRequest, PaymentGateway};
use crate::clients::inventory::TicketInventory;
use crate::events::{
    PaymentValidatedEvent, TicketSoldEvent, TransactionRefundedEvent, TOPIC_PAYMENT_VALIDATED,
    TOPIC_TICKET_SOLD, TOPIC_TRANSACTION_REFUNDED,
};
use crate::models::transaction::{PaymentMethod, Transaction, TransactionStatus};
use crate::service::fees::{to_minor_units, FeeSchedule};
use crate::store::{StoreError, TransactionStore};
use crate::utils::error::AppError;

const PERSIST_ATTEMPTS: u32 = 3;
const PERSIST_BACKOFF: Duration = Duration::from_millis(50);

/// Result of a successful `initiate`: the persisted PENDING transaction and
/// the gateway's client handle. The handle exists only in this value; it
/// is never persisted and cannot be read back from any endpoint.
#[derive(Debug)]
pub struct InitiatedPurchase {
    pub transaction: Transaction,
    pub client_secret: String,
}

/// Drives the purchase saga across the tickets service, the payment
/// gateway, the event bus and the store. Sole owner of lifecycle writes:
/// nothing else mutates `status` or `payment_token`.
pub struct TransactionCoordinator {
    store: Arc<dyn TransactionStore>,
    inventory: Arc<dyn TicketInventory>,
    gateway: Arc<dyn PaymentGateway>,
    events: Arc<dyn EventPublisher>,
    fees: FeeSchedule,
    currency: String,
    /// Serializes read-check-write per transaction id so racing confirms or
    /// a confirm racing a cancel cannot both pass the PENDING check.
    /// Collaborator calls are never awaited while one of these is held.
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl TransactionCoordinator {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        inventory: Arc<dyn TicketInventory>,
        gateway: Arc<dyn PaymentGateway>,
        events: Arc<dyn EventPublisher>,
        fees: FeeSchedule,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            store,
            inventory,
            gateway,
            events,
            fees,
            currency: currency.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Step 1 of a purchase: reserve the ticket, quote the fees, open a
    /// payment intent, persist PENDING. Each later step compensates the
    /// earlier ones on failure.
    pub async fn initiate(
        &self,
        buyer_id: Uuid,
        ticket_id: Uuid,
        payment_method: PaymentMethod,
    ) -> Result<InitiatedPurchase, AppError> {
        let ticket = self.inventory.fetch(ticket_id).await?;
        if !ticket.status.is_available() {
            return Err(AppError::Conflict(format!(
                "Ticket {ticket_id} is not available for sale"
            )));
        }

        self.inventory.reserve(ticket_id).await?;

        let quote = self.fees.quote(ticket.sale_price);
        let mut tx = Transaction::new(buyer_id, ticket_id, ticket.vendor_id, quote, payment_method);

        let intent = match self
            .gateway
            .create_intent(CreateIntentRequest {
                amount_minor: to_minor_units(quote.total_amount),
                currency: self.currency.clone(),
                transaction_id: tx.id,
                ticket_id,
                buyer_id,
            })
            .await
        {
            Ok(intent) => intent,
            Err(e) => {
                if let Err(release_err) = self.inventory.release(ticket_id).await {
                    warn!(
                        ticket_id = %ticket_id,
                        error = %release_err,
                        "reservation release failed while unwinding a gateway error"
                    );
                }
                return Err(e.into());
            }
        };
        tx.payment_token = Some(intent.reference.clone());

        let saved = match self.save_with_retry(&tx).await {
            Ok(saved) => saved,
            Err(e) => {
                error!(
                    transaction_id = %tx.id,
                    intent = %intent.reference,
                    "could not persist initiated transaction, unwinding gateway intent"
                );
                if let Err(cancel_err) = self.gateway.cancel_intent(&intent.reference).await {
                    error!(
                        intent = %intent.reference,
                        error = %cancel_err,
                        "intent cancel failed, manual reconciliation required"
                    );
                }
                if let Err(release_err) = self.inventory.release(ticket_id).await {
                    warn!(
                        ticket_id = %ticket_id,
                        error = %release_err,
                        "reservation release failed while unwinding a persistence error"
                    );
                }
                return Err(e.into());
            }
        };

        info!(
            transaction_id = %saved.id,
            ticket_id = %ticket_id,
            buyer_id = %buyer_id,
            total_amount = %saved.total_amount,
            "purchase initiated"
        );
        Ok(InitiatedPurchase {
            transaction: saved,
            client_secret: intent.client_secret,
        })
    }

    /// Confirms payment. The COMPLETED commit is the durability boundary:
    /// it happens under the admission lock, before any collaborator is
    /// notified. Duplicate confirmations return the record unchanged.
    pub async fn complete(&self, id: Uuid) -> Result<Transaction, AppError> {
        let committed = {
            let guard = self.lock_for(id).await;
            let _held = guard.lock().await;

            let mut tx = self.load(id).await?;
            if tx.status == TransactionStatus::Completed {
                debug!(transaction_id = %id, "duplicate confirmation, returning existing record");
                return Ok(tx);
            }
            tx.complete(Utc::now())?;
            self.store.save(&tx).await?
        };

        // The financial commit stands whatever happens below; the inventory
        // side is closed out of band if this call is lost.
        if let Err(e) = self.inventory.mark_sold(committed.ticket_id).await {
            warn!(
                transaction_id = %committed.id,
                ticket_id = %committed.ticket_id,
                error = %e,
                "mark-sold failed after completion"
            );
        }

        self.emit(
            TOPIC_TICKET_SOLD,
            committed.id,
            &TicketSoldEvent {
                ticket_id: committed.ticket_id,
                transaction_id: committed.id,
                buyer_id: committed.buyer_id,
            },
        )
        .await;
        self.emit(
            TOPIC_PAYMENT_VALIDATED,
            committed.id,
            &PaymentValidatedEvent {
                transaction_id: committed.id,
                buyer_id: committed.buyer_id,
                vendor_id: committed.vendor_id,
                amount: committed.total_amount,
                vendor_amount: committed.vendor_amount,
            },
        )
        .await;

        info!(transaction_id = %committed.id, "transaction completed");
        Ok(committed)
    }

    /// User-initiated abandonment. No-op on anything but PENDING.
    pub async fn cancel(&self, id: Uuid) -> Result<(), AppError> {
        self.finalize_pending(id, TransactionStatus::Canceled).await
    }

    /// Payment-failure abandonment. No-op on anything but PENDING.
    pub async fn fail(&self, id: Uuid) -> Result<(), AppError> {
        self.finalize_pending(id, TransactionStatus::Failed).await
    }

    async fn finalize_pending(
        &self,
        id: Uuid,
        default_outcome: TransactionStatus,
    ) -> Result<(), AppError> {
        let tx = self.load(id).await?;
        if tx.status != TransactionStatus::Pending {
            debug!(
                transaction_id = %id,
                status = ?tx.status,
                "cancel/fail on a settled transaction is a no-op"
            );
            return Ok(());
        }

        // The gateway knows whether a payment error occurred; that decides
        // CANCELED vs FAILED. A failed probe falls back to the entry
        // point's default instead of blocking the transition.
        let outcome = match &tx.payment_token {
            Some(token) => match self.gateway.retrieve_intent(token).await {
                Ok(probe) if probe.last_error.is_some() => TransactionStatus::Failed,
                Ok(_) => TransactionStatus::Canceled,
                Err(e) => {
                    warn!(
                        transaction_id = %id,
                        error = %e,
                        "intent probe failed, using default outcome"
                    );
                    default_outcome
                }
            },
            None => default_outcome,
        };

        {
            let guard = self.lock_for(id).await;
            let _held = guard.lock().await;

            let mut current = self.load(id).await?;
            if current.status != TransactionStatus::Pending {
                return Ok(());
            }
            if outcome == TransactionStatus::Failed {
                current.fail()?;
            } else {
                current.cancel()?;
            }
            self.store.save(&current).await?;
        }

        if let Err(e) = self.inventory.release(tx.ticket_id).await {
            warn!(
                transaction_id = %id,
                ticket_id = %tx.ticket_id,
                error = %e,
                "reservation release failed after terminal transition"
            );
        }

        info!(transaction_id = %id, outcome = ?outcome, "transaction closed without sale");
        Ok(())
    }

    /// Refunds a completed purchase. The gateway refund must succeed before
    /// anything is persisted; a declined refund leaves the record COMPLETED.
    pub async fn refund(&self, id: Uuid) -> Result<(), AppError> {
        let tx = self.load(id).await?;
        if tx.status != TransactionStatus::Completed {
            return Err(AppError::InvalidState(format!(
                "Only completed transactions can be refunded (current: {:?})",
                tx.status
            )));
        }

        // The vendor captured at initiation is authoritative; the ticket
        // lookup only covers legacy rows the backfill has not reached yet.
        let vendor_id = match tx.vendor_id {
            Some(vendor_id) => vendor_id,
            None => self.inventory.fetch(tx.ticket_id).await?.vendor_id,
        };

        let token = tx.payment_token.clone().ok_or_else(|| {
            AppError::InvalidState(format!("Transaction {id} has no payment token to refund"))
        })?;

        let status = self.gateway.refund(&token).await?;
        if !status.is_succeeded() {
            return Err(AppError::PaymentGateway(format!(
                "refund for intent {token} returned {status:?}"
            )));
        }

        let committed = {
            let guard = self.lock_for(id).await;
            let _held = guard.lock().await;

            let mut current = self.load(id).await?;
            current.refund()?;
            current.vendor_id = Some(vendor_id);
            self.store.save(&current).await?
        };

        self.emit(
            TOPIC_TRANSACTION_REFUNDED,
            committed.id,
            &TransactionRefundedEvent {
                transaction_id: committed.id,
                ticket_id: committed.ticket_id,
                vendor_id: committed.vendor_id,
                vendor_amount: committed.vendor_amount,
            },
        )
        .await;

        info!(transaction_id = %id, "transaction refunded");
        Ok(())
    }

    /// Maintenance sweep patching vendor ids onto rows that predate capture
    /// at initiation. Individual lookup or save failures are logged and
    /// skipped; the sweep is idempotent. Returns the patched count.
    pub async fn backfill_vendor_ids(&self) -> Result<u64, AppError> {
        let all = self.store.list_all().await?;
        let mut patched = 0u64;
        for mut tx in all {
            if tx.vendor_id.is_some() {
                continue;
            }
            match self.inventory.fetch(tx.ticket_id).await {
                Ok(snapshot) => {
                    tx.vendor_id = Some(snapshot.vendor_id);
                    match self.store.save(&tx).await {
                        Ok(_) => patched += 1,
                        Err(e) => {
                            warn!(transaction_id = %tx.id, error = %e, "vendor backfill save failed");
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        transaction_id = %tx.id,
                        ticket_id = %tx.ticket_id,
                        error = %e,
                        "vendor backfill lookup failed"
                    );
                }
            }
        }
        info!(patched, "vendor id backfill finished");
        Ok(patched)
    }

    pub async fn get(&self, id: Uuid) -> Result<Transaction, AppError> {
        self.load(id).await
    }

    pub async fn history_for_buyer(&self, buyer_id: Uuid) -> Result<Vec<Transaction>, AppError> {
        Ok(self.store.list_by_buyer(buyer_id).await?)
    }

    pub async fn sales_for_vendor(&self, vendor_id: Uuid) -> Result<Vec<Transaction>, AppError> {
        Ok(self.store.list_by_vendor(vendor_id).await?)
    }

    pub async fn list_all(&self) -> Result<Vec<Transaction>, AppError> {
        Ok(self.store.list_all().await?)
    }

    async fn load(&self, id: Uuid) -> Result<Transaction, AppError> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Transaction {id} not found")))
    }

    async fn save_with_retry(&self, tx: &Transaction) -> Result<Transaction, StoreError> {
        let mut backoff = PERSIST_BACKOFF;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.store.save(tx).await {
                Ok(saved) => return Ok(saved),
                Err(e) if attempt < PERSIST_ATTEMPTS => {
                    warn!(
                        transaction_id = %tx.id,
                        attempt,
                        error = %e,
                        "transaction save failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Fire-and-forget publication: a lost event is logged, never surfaced
    /// to the caller. Consumers dedupe on transaction id.
    async fn emit<E: Serialize>(&self, topic: &str, key: Uuid, event: &E) {
        let payload = match serde_json::to_value(event) {
            Ok(payload) => payload,
            Err(e) => {
                error!(topic, error = %e, "event payload serialization failed");
                return;
            }
        };
        if let Err(e) = self.events.publish(topic, &key.to_string(), payload).await {
            warn!(topic, key = %key, error = %e, "event publish failed");
        }
    }

    async fn lock_for(&self, id: Uuid) -> Arc<Mutex<()>> {
        let mut map = self.locks.lock().await;
        map.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(map.entry(id).or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    use rust_decimal::Decimal;

    use crate::clients::bus::PublishError;
    use crate::clients::gateway::{GatewayError, IntentProbe, PaymentIntent, RefundStatus};
    use crate::clients::inventory::InventoryError;
    use crate::models::ticket::{TicketSnapshot, TicketStatus};

    use async_trait::async_trait;

    #[derive(Default)]
    struct FakeInventory {
        tickets: HashMap<Uuid, TicketSnapshot>,
        reserve_conflict: bool,
        mark_sold_fails: bool,
        fetches: AtomicUsize,
        reserves: StdMutex<Vec<Uuid>>,
        releases: StdMutex<Vec<Uuid>>,
        sold: StdMutex<Vec<Uuid>>,
    }

    #[async_trait]
    impl TicketInventory for FakeInventory {
        async fn fetch(&self, ticket_id: Uuid) -> Result<TicketSnapshot, InventoryError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.tickets
                .get(&ticket_id)
                .cloned()
                .ok_or(InventoryError::NotFound(ticket_id))
        }

        async fn reserve(&self, ticket_id: Uuid) -> Result<(), InventoryError> {
            if self.reserve_conflict {
                return Err(InventoryError::Conflict("already reserved".into()));
            }
            self.reserves.lock().unwrap().push(ticket_id);
            Ok(())
        }

        async fn release(&self, ticket_id: Uuid) -> Result<(), InventoryError> {
            self.releases.lock().unwrap().push(ticket_id);
            Ok(())
        }

        async fn mark_sold(&self, ticket_id: Uuid) -> Result<(), InventoryError> {
            if self.mark_sold_fails {
                return Err(InventoryError::Unavailable("tickets service down".into()));
            }
            self.sold.lock().unwrap().push(ticket_id);
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeGateway {
        create_fails: bool,
        probe_fails: bool,
        probe_last_error: Option<String>,
        refund_call_fails: bool,
        refund_status: Option<RefundStatus>,
        created: StdMutex<Vec<CreateIntentRequest>>,
        canceled: StdMutex<Vec<String>>,
        refunds: StdMutex<Vec<String>>,
        probes: AtomicUsize,
    }

    #[async_trait]
    impl PaymentGateway for FakeGateway {
        async fn create_intent(
            &self,
            req: CreateIntentRequest,
        ) -> Result<PaymentIntent, GatewayError> {
            if self.create_fails {
                return Err(GatewayError::Rejected("card network unreachable".into()));
            }
            let reference = format!("pi_{}", req.transaction_id.simple());
            let client_secret = format!("{reference}_secret");
            self.created.lock().unwrap().push(req);
            Ok(PaymentIntent {
                reference,
                client_secret,
            })
        }

        async fn retrieve_intent(&self, reference: &str) -> Result<IntentProbe, GatewayError> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            if self.probe_fails {
                return Err(GatewayError::Transport("timeout".into()));
            }
            Ok(IntentProbe {
                client_secret: format!("{reference}_secret"),
                last_error: self.probe_last_error.clone(),
            })
        }

        async fn cancel_intent(&self, reference: &str) -> Result<(), GatewayError> {
            self.canceled.lock().unwrap().push(reference.to_string());
            Ok(())
        }

        async fn refund(&self, reference: &str) -> Result<RefundStatus, GatewayError> {
            if self.refund_call_fails {
                return Err(GatewayError::Transport("timeout".into()));
            }
            self.refunds.lock().unwrap().push(reference.to_string());
            Ok(self.refund_status.unwrap_or(RefundStatus::Succeeded))
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        rows: StdMutex<HashMap<Uuid, Transaction>>,
        fail_next_saves: AtomicUsize,
    }

    #[async_trait]
    impl TransactionStore for MemoryStore {
        async fn get(&self, id: Uuid) -> Result<Option<Transaction>, StoreError> {
            Ok(self.rows.lock().unwrap().get(&id).cloned())
        }

        async fn save(&self, tx: &Transaction) -> Result<Transaction, StoreError> {
            let remaining = self.fail_next_saves.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_next_saves.store(remaining - 1, Ordering::SeqCst);
                return Err(StoreError::Unavailable("connection reset".into()));
            }
            self.rows.lock().unwrap().insert(tx.id, tx.clone());
            Ok(tx.clone())
        }

        async fn list_by_buyer(&self, buyer_id: Uuid) -> Result<Vec<Transaction>, StoreError> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .values()
                .filter(|t| t.buyer_id == buyer_id)
                .cloned()
                .collect())
        }

        async fn list_by_vendor(&self, vendor_id: Uuid) -> Result<Vec<Transaction>, StoreError> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .values()
                .filter(|t| t.vendor_id == Some(vendor_id))
                .cloned()
                .collect())
        }

        async fn list_all(&self) -> Result<Vec<Transaction>, StoreError> {
            Ok(self.rows.lock().unwrap().values().cloned().collect())
        }
    }

    #[derive(Default)]
    struct FakeBus {
        published: StdMutex<Vec<(String, serde_json::Value)>>,
    }

    #[async_trait]
    impl EventPublisher for FakeBus {
        async fn publish(
            &self,
            topic: &str,
            _key: &str,
            payload: serde_json::Value,
        ) -> Result<(), PublishError> {
            self.published
                .lock()
                .unwrap()
                .push((topic.to_string(), payload));
            Ok(())
        }
    }

    fn available_ticket(ticket_id: Uuid, vendor_id: Uuid, price_cents: i64) -> TicketSnapshot {
        TicketSnapshot {
            id: ticket_id,
            event_id: Uuid::new_v4(),
            sale_price: Decimal::new(price_cents, 2),
            status: TicketStatus::Available,
            vendor_id,
        }
    }

    struct Harness {
        coordinator: TransactionCoordinator,
        inventory: Arc<FakeInventory>,
        gateway: Arc<FakeGateway>,
        store: Arc<MemoryStore>,
        bus: Arc<FakeBus>,
    }

    fn harness(inventory: FakeInventory, gateway: FakeGateway, store: MemoryStore) -> Harness {
        let inventory = Arc::new(inventory);
        let gateway = Arc::new(gateway);
        let store = Arc::new(store);
        let bus = Arc::new(FakeBus::default());
        let coordinator = TransactionCoordinator::new(
            store.clone(),
            inventory.clone(),
            gateway.clone(),
            bus.clone(),
            FeeSchedule::new(Decimal::new(5, 2)),
            "eur",
        );
        Harness {
            coordinator,
            inventory,
            gateway,
            store,
            bus,
        }
    }

    fn seeded_pending(store: &MemoryStore, vendor_id: Option<Uuid>) -> Transaction {
        let mut tx = Transaction::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            vendor_id.unwrap_or_else(Uuid::new_v4),
            FeeSchedule::new(Decimal::new(5, 2)).quote(Decimal::new(10000, 2)),
            PaymentMethod::CreditCard,
        );
        tx.vendor_id = vendor_id;
        tx.payment_token = Some("pi_seeded".to_string());
        store.rows.lock().unwrap().insert(tx.id, tx.clone());
        tx
    }

    fn seeded_completed(store: &MemoryStore, vendor_id: Option<Uuid>) -> Transaction {
        let mut tx = seeded_pending(store, vendor_id);
        tx.complete(Utc::now()).unwrap();
        store.rows.lock().unwrap().insert(tx.id, tx.clone());
        tx
    }

    fn topics(bus: &FakeBus) -> Vec<String> {
        bus.published
            .lock()
            .unwrap()
            .iter()
            .map(|(t, _)| t.clone())
            .collect()
    }

    #[tokio::test]
    async fn initiate_reserves_quotes_and_persists_pending() {
        let ticket_id = Uuid::new_v4();
        let vendor_id = Uuid::new_v4();
        let buyer_id = Uuid::new_v4();
        let mut inventory = FakeInventory::default();
        inventory
            .tickets
            .insert(ticket_id, available_ticket(ticket_id, vendor_id, 10000));
        let h = harness(inventory, FakeGateway::default(), MemoryStore::default());

        let purchase = h
            .coordinator
            .initiate(buyer_id, ticket_id, PaymentMethod::CreditCard)
            .await
            .unwrap();

        let tx = &purchase.transaction;
        assert_eq!(tx.status, TransactionStatus::Pending);
        assert_eq!(tx.payment_status, crate::models::PaymentStatus::Unpaid);
        assert_eq!(tx.vendor_id, Some(vendor_id));
        assert_eq!(tx.platform_fee, Decimal::new(500, 2));
        assert_eq!(tx.total_amount, Decimal::new(10500, 2));
        assert_eq!(tx.vendor_amount, Decimal::new(10000, 2));
        assert_eq!(tx.total_amount, tx.platform_fee + tx.vendor_amount);
        assert!(tx.payment_token.is_some());
        assert!(!purchase.client_secret.is_empty());

        assert_eq!(h.inventory.reserves.lock().unwrap().len(), 1);
        let created = h.gateway.created.lock().unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].amount_minor, 10500);
        assert_eq!(created[0].currency, "eur");
        assert!(h.store.rows.lock().unwrap().contains_key(&tx.id));
    }

    #[tokio::test]
    async fn initiate_on_sold_ticket_conflicts_without_side_effects() {
        let ticket_id = Uuid::new_v4();
        let mut snapshot = available_ticket(ticket_id, Uuid::new_v4(), 10000);
        snapshot.status = TicketStatus::Sold;
        let mut inventory = FakeInventory::default();
        inventory.tickets.insert(ticket_id, snapshot);
        let h = harness(inventory, FakeGateway::default(), MemoryStore::default());

        let err = h
            .coordinator
            .initiate(Uuid::new_v4(), ticket_id, PaymentMethod::CreditCard)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Conflict(_)));
        assert!(h.inventory.reserves.lock().unwrap().is_empty());
        assert!(h.gateway.created.lock().unwrap().is_empty());
        assert!(h.store.rows.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn initiate_reservation_conflict_stops_the_saga() {
        let ticket_id = Uuid::new_v4();
        let mut inventory = FakeInventory {
            reserve_conflict: true,
            ..FakeInventory::default()
        };
        inventory
            .tickets
            .insert(ticket_id, available_ticket(ticket_id, Uuid::new_v4(), 10000));
        let h = harness(inventory, FakeGateway::default(), MemoryStore::default());

        let err = h
            .coordinator
            .initiate(Uuid::new_v4(), ticket_id, PaymentMethod::CreditCard)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Conflict(_)));
        assert!(h.gateway.created.lock().unwrap().is_empty());
        assert!(h.store.rows.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn initiate_gateway_failure_releases_reservation() {
        let ticket_id = Uuid::new_v4();
        let mut inventory = FakeInventory::default();
        inventory
            .tickets
            .insert(ticket_id, available_ticket(ticket_id, Uuid::new_v4(), 10000));
        let gateway = FakeGateway {
            create_fails: true,
            ..FakeGateway::default()
        };
        let h = harness(inventory, gateway, MemoryStore::default());

        let err = h
            .coordinator
            .initiate(Uuid::new_v4(), ticket_id, PaymentMethod::CreditCard)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::PaymentGateway(_)));
        assert_eq!(h.inventory.releases.lock().unwrap().as_slice(), &[ticket_id]);
        assert!(h.store.rows.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn initiate_retries_persistence_before_compensating() {
        let ticket_id = Uuid::new_v4();
        let mut inventory = FakeInventory::default();
        inventory
            .tickets
            .insert(ticket_id, available_ticket(ticket_id, Uuid::new_v4(), 10000));
        let store = MemoryStore::default();
        store.fail_next_saves.store(1, Ordering::SeqCst);
        let h = harness(inventory, FakeGateway::default(), store);

        let purchase = h
            .coordinator
            .initiate(Uuid::new_v4(), ticket_id, PaymentMethod::CreditCard)
            .await
            .unwrap();

        // One transient failure is absorbed; the intent survives.
        assert!(h.gateway.canceled.lock().unwrap().is_empty());
        assert!(h
            .store
            .rows
            .lock()
            .unwrap()
            .contains_key(&purchase.transaction.id));
    }

    #[tokio::test]
    async fn initiate_cancels_intent_when_persistence_is_exhausted() {
        let ticket_id = Uuid::new_v4();
        let mut inventory = FakeInventory::default();
        inventory
            .tickets
            .insert(ticket_id, available_ticket(ticket_id, Uuid::new_v4(), 10000));
        let store = MemoryStore::default();
        store.fail_next_saves.store(PERSIST_ATTEMPTS as usize, Ordering::SeqCst);
        let h = harness(inventory, FakeGateway::default(), store);

        let err = h
            .coordinator
            .initiate(Uuid::new_v4(), ticket_id, PaymentMethod::CreditCard)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::DependencyUnavailable(_)));
        assert_eq!(h.gateway.canceled.lock().unwrap().len(), 1);
        assert_eq!(h.inventory.releases.lock().unwrap().as_slice(), &[ticket_id]);
        assert!(h.store.rows.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn complete_commits_marks_sold_and_publishes() {
        let h = harness(
            FakeInventory::default(),
            FakeGateway::default(),
            MemoryStore::default(),
        );
        let tx = seeded_pending(&h.store, Some(Uuid::new_v4()));

        let completed = h.coordinator.complete(tx.id).await.unwrap();

        assert_eq!(completed.status, TransactionStatus::Completed);
        assert_eq!(completed.payment_status, crate::models::PaymentStatus::Paid);
        assert!(completed.validation_date.is_some());
        assert_eq!(h.inventory.sold.lock().unwrap().as_slice(), &[tx.ticket_id]);
        assert_eq!(
            topics(&h.bus),
            vec![TOPIC_TICKET_SOLD.to_string(), TOPIC_PAYMENT_VALIDATED.to_string()]
        );
    }

    #[tokio::test]
    async fn complete_twice_is_idempotent_and_publishes_once() {
        let h = harness(
            FakeInventory::default(),
            FakeGateway::default(),
            MemoryStore::default(),
        );
        let tx = seeded_pending(&h.store, Some(Uuid::new_v4()));

        let first = h.coordinator.complete(tx.id).await.unwrap();
        let second = h.coordinator.complete(tx.id).await.unwrap();

        assert_eq!(first.status, TransactionStatus::Completed);
        assert_eq!(second.status, TransactionStatus::Completed);
        assert_eq!(first.validation_date, second.validation_date);
        assert_eq!(topics(&h.bus).len(), 2);
        assert_eq!(h.inventory.sold.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn complete_on_canceled_transaction_is_invalid_state() {
        let h = harness(
            FakeInventory::default(),
            FakeGateway::default(),
            MemoryStore::default(),
        );
        let mut tx = seeded_pending(&h.store, Some(Uuid::new_v4()));
        tx.cancel().unwrap();
        h.store.rows.lock().unwrap().insert(tx.id, tx.clone());

        let err = h.coordinator.complete(tx.id).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
        assert!(topics(&h.bus).is_empty());
    }

    #[tokio::test]
    async fn complete_survives_mark_sold_failure() {
        let inventory = FakeInventory {
            mark_sold_fails: true,
            ..FakeInventory::default()
        };
        let h = harness(inventory, FakeGateway::default(), MemoryStore::default());
        let tx = seeded_pending(&h.store, Some(Uuid::new_v4()));

        let completed = h.coordinator.complete(tx.id).await.unwrap();

        assert_eq!(completed.status, TransactionStatus::Completed);
        // The financial commit stands and both events still go out.
        assert_eq!(topics(&h.bus).len(), 2);
    }

    #[tokio::test]
    async fn cancel_releases_reservation_and_records_canceled() {
        let h = harness(
            FakeInventory::default(),
            FakeGateway::default(),
            MemoryStore::default(),
        );
        let tx = seeded_pending(&h.store, Some(Uuid::new_v4()));

        h.coordinator.cancel(tx.id).await.unwrap();

        let stored = h.store.rows.lock().unwrap().get(&tx.id).cloned().unwrap();
        assert_eq!(stored.status, TransactionStatus::Canceled);
        assert_eq!(h.inventory.releases.lock().unwrap().as_slice(), &[tx.ticket_id]);
    }

    #[tokio::test]
    async fn cancel_upgrades_to_failed_when_gateway_reports_a_payment_error() {
        let gateway = FakeGateway {
            probe_last_error: Some("card_declined".into()),
            ..FakeGateway::default()
        };
        let h = harness(FakeInventory::default(), gateway, MemoryStore::default());
        let tx = seeded_pending(&h.store, Some(Uuid::new_v4()));

        h.coordinator.cancel(tx.id).await.unwrap();

        let stored = h.store.rows.lock().unwrap().get(&tx.id).cloned().unwrap();
        assert_eq!(stored.status, TransactionStatus::Failed);
    }

    #[tokio::test]
    async fn fail_downgrades_to_default_when_probe_errors() {
        let gateway = FakeGateway {
            probe_fails: true,
            ..FakeGateway::default()
        };
        let h = harness(FakeInventory::default(), gateway, MemoryStore::default());
        let tx = seeded_pending(&h.store, Some(Uuid::new_v4()));

        h.coordinator.fail(tx.id).await.unwrap();

        let stored = h.store.rows.lock().unwrap().get(&tx.id).cloned().unwrap();
        assert_eq!(stored.status, TransactionStatus::Failed);
    }

    #[tokio::test]
    async fn cancel_on_settled_transaction_is_a_noop_without_collaborator_calls() {
        let h = harness(
            FakeInventory::default(),
            FakeGateway::default(),
            MemoryStore::default(),
        );
        let tx = seeded_completed(&h.store, Some(Uuid::new_v4()));

        h.coordinator.cancel(tx.id).await.unwrap();
        h.coordinator.fail(tx.id).await.unwrap();

        let stored = h.store.rows.lock().unwrap().get(&tx.id).cloned().unwrap();
        assert_eq!(stored.status, TransactionStatus::Completed);
        assert_eq!(h.gateway.probes.load(Ordering::SeqCst), 0);
        assert!(h.inventory.releases.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn refund_commits_and_publishes_after_gateway_success() {
        let vendor_id = Uuid::new_v4();
        let h = harness(
            FakeInventory::default(),
            FakeGateway::default(),
            MemoryStore::default(),
        );
        let tx = seeded_completed(&h.store, Some(vendor_id));

        h.coordinator.refund(tx.id).await.unwrap();

        let stored = h.store.rows.lock().unwrap().get(&tx.id).cloned().unwrap();
        assert_eq!(stored.status, TransactionStatus::Refunded);
        assert_eq!(stored.payment_status, crate::models::PaymentStatus::Refunded);
        assert_eq!(h.gateway.refunds.lock().unwrap().as_slice(), &["pi_seeded".to_string()]);

        let published = h.bus.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, TOPIC_TRANSACTION_REFUNDED);
        assert_eq!(
            published[0].1["vendorId"],
            serde_json::json!(vendor_id.to_string())
        );
        assert_eq!(published[0].1["vendorAmount"], serde_json::json!("100.00"));
    }

    #[tokio::test]
    async fn refund_on_pending_is_invalid_state_without_gateway_call() {
        let h = harness(
            FakeInventory::default(),
            FakeGateway::default(),
            MemoryStore::default(),
        );
        let tx = seeded_pending(&h.store, Some(Uuid::new_v4()));

        let err = h.coordinator.refund(tx.id).await.unwrap_err();

        assert!(matches!(err, AppError::InvalidState(_)));
        assert!(h.gateway.refunds.lock().unwrap().is_empty());
        let stored = h.store.rows.lock().unwrap().get(&tx.id).cloned().unwrap();
        assert_eq!(stored.status, TransactionStatus::Pending);
    }

    #[tokio::test]
    async fn refund_gateway_nonsuccess_leaves_completed_and_publishes_nothing() {
        let gateway = FakeGateway {
            refund_status: Some(RefundStatus::Failed),
            ..FakeGateway::default()
        };
        let h = harness(FakeInventory::default(), gateway, MemoryStore::default());
        let tx = seeded_completed(&h.store, Some(Uuid::new_v4()));

        let err = h.coordinator.refund(tx.id).await.unwrap_err();

        assert!(matches!(err, AppError::PaymentGateway(_)));
        let stored = h.store.rows.lock().unwrap().get(&tx.id).cloned().unwrap();
        assert_eq!(stored.status, TransactionStatus::Completed);
        assert!(topics(&h.bus).is_empty());
    }

    #[tokio::test]
    async fn refund_falls_back_to_ticket_lookup_for_missing_vendor() {
        let vendor_id = Uuid::new_v4();
        let mut inventory = FakeInventory::default();
        let store = MemoryStore::default();
        let tx = seeded_completed(&store, None);
        inventory
            .tickets
            .insert(tx.ticket_id, available_ticket(tx.ticket_id, vendor_id, 10000));
        let h = harness(inventory, FakeGateway::default(), store);

        h.coordinator.refund(tx.id).await.unwrap();

        let stored = h.store.rows.lock().unwrap().get(&tx.id).cloned().unwrap();
        assert_eq!(stored.vendor_id, Some(vendor_id));
        assert_eq!(h.inventory.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn backfill_patches_missing_vendor_ids_and_survives_lookup_failures() {
        let vendor_id = Uuid::new_v4();
        let mut inventory = FakeInventory::default();
        let store = MemoryStore::default();

        // One row with a vendor, one patchable row, one whose ticket is gone.
        seeded_completed(&store, Some(Uuid::new_v4()));
        let patchable = seeded_pending(&store, None);
        inventory.tickets.insert(
            patchable.ticket_id,
            available_ticket(patchable.ticket_id, vendor_id, 10000),
        );
        let orphan = seeded_pending(&store, None);

        let h = harness(inventory, FakeGateway::default(), store);
        let patched = h.coordinator.backfill_vendor_ids().await.unwrap();

        assert_eq!(patched, 1);
        let rows = h.store.rows.lock().unwrap();
        assert_eq!(rows.get(&patchable.id).unwrap().vendor_id, Some(vendor_id));
        assert_eq!(rows.get(&orphan.id).unwrap().vendor_id, None);
    }

    #[tokio::test]
    async fn queries_filter_by_party() {
        let h = harness(
            FakeInventory::default(),
            FakeGateway::default(),
            MemoryStore::default(),
        );
        let vendor_id = Uuid::new_v4();
        let tx = seeded_completed(&h.store, Some(vendor_id));
        seeded_completed(&h.store, Some(Uuid::new_v4()));

        let history = h.coordinator.history_for_buyer(tx.buyer_id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, tx.id);

        let sales = h.coordinator.sales_for_vendor(vendor_id).await.unwrap();
        assert_eq!(sales.len(), 1);

        assert_eq!(h.coordinator.list_all().await.unwrap().len(), 2);
        assert!(matches!(
            h.coordinator.get(Uuid::new_v4()).await.unwrap_err(),
            AppError::NotFound(_)
        ));
    }
}
