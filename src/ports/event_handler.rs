//! EventHandler port - Interface for code that reacts to events.
//!
//! `EventHandler` is the erased form the bus stores and invokes.
//! `DistributedEventHandler<E>` is the typed form application code writes;
//! the bus wraps it in an adapter that downcasts before calling it.

use async_trait::async_trait;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::domain::foundation::{AnyEvent, DomainError, ErrorCode, Event};

/// Handler for processing events of one type (and its descendants).
///
/// Implementations should be:
/// - **Idempotent** - Delivery is at-least-once
/// - **Quick** - Long operations should be queued for async processing
/// - **Isolated** - Errors don't affect other handlers
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Process an event already converted to the subscribed type.
    async fn handle(&self, event: AnyEvent) -> Result<(), DomainError>;

    /// Handler name for logging and idempotency bookkeeping.
    fn name(&self) -> &'static str;

    /// Whether the bus may run this handler concurrently with itself.
    fn is_reentrant(&self) -> bool {
        false
    }

    /// Identity used to avoid invoking the same handler twice for one event.
    fn identity(&self) -> usize {
        self as *const Self as *const () as usize
    }
}

/// Typed handler for events of type `E`.
///
/// # Example
///
/// ```ignore
/// struct ReceiptMailer { /* ... */ }
///
/// #[async_trait]
/// impl DistributedEventHandler<OrderPlaced> for ReceiptMailer {
///     async fn handle_event(&self, event: Arc<OrderPlaced>) -> Result<(), DomainError> {
///         self.mailer.send_receipt(&event.order_id).await
///     }
/// }
/// ```
#[async_trait]
pub trait DistributedEventHandler<E: Event>: Send + Sync {
    async fn handle_event(&self, event: Arc<E>) -> Result<(), DomainError>;

    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    fn is_reentrant(&self) -> bool {
        false
    }
}

fn mismatched<E: Event>(handler: &str, event: &AnyEvent) -> DomainError {
    DomainError::new(
        ErrorCode::InternalError,
        format!(
            "{} expects {} but was dispatched {}",
            handler,
            E::NAME,
            event.name()
        ),
    )
}

/// Adapts a `DistributedEventHandler<E>` to `EventHandler`.
pub struct TypedHandler<E, H: ?Sized> {
    inner: Arc<H>,
    _event: PhantomData<fn(E)>,
}

impl<E: Event, H: DistributedEventHandler<E> + ?Sized> TypedHandler<E, H> {
    pub fn new(inner: Arc<H>) -> Self {
        Self {
            inner,
            _event: PhantomData,
        }
    }
}

#[async_trait]
impl<E, H> EventHandler for TypedHandler<E, H>
where
    E: Event,
    H: DistributedEventHandler<E> + ?Sized + 'static,
{
    async fn handle(&self, event: AnyEvent) -> Result<(), DomainError> {
        let typed = event
            .downcast::<E>()
            .ok_or_else(|| mismatched::<E>(self.inner.name(), &event))?;
        self.inner.handle_event(typed).await
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn is_reentrant(&self) -> bool {
        self.inner.is_reentrant()
    }

    fn identity(&self) -> usize {
        Arc::as_ptr(&self.inner) as *const () as usize
    }
}

/// Handler backed by an async closure.
pub struct FnHandler<E, F> {
    name: &'static str,
    handler: F,
    _event: PhantomData<fn(E)>,
}

#[async_trait]
impl<E, F, Fut> EventHandler for FnHandler<E, F>
where
    E: Event,
    F: Fn(Arc<E>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), DomainError>> + Send + 'static,
{
    async fn handle(&self, event: AnyEvent) -> Result<(), DomainError> {
        let typed = event
            .downcast::<E>()
            .ok_or_else(|| mismatched::<E>(self.name, &event))?;
        (self.handler)(typed).await
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

/// Wraps an async closure as an `EventHandler` for `E`.
pub fn handler_fn<E, F, Fut>(name: &'static str, handler: F) -> Arc<dyn EventHandler>
where
    E: Event,
    F: Fn(Arc<E>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), DomainError>> + Send + 'static,
{
    Arc::new(FnHandler {
        name,
        handler,
        _event: PhantomData::<fn(E)>,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct InvoiceIssued {
        invoice_id: String,
    }
    crate::distributed_event!(InvoiceIssued, name = "billing.invoice_issued");

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct InvoicePaid {
        invoice_id: String,
    }
    crate::distributed_event!(InvoicePaid, name = "billing.invoice_paid");

    struct Ledger {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DistributedEventHandler<InvoiceIssued> for Ledger {
        async fn handle_event(&self, _event: Arc<InvoiceIssued>) -> Result<(), DomainError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn name(&self) -> &'static str {
            "Ledger"
        }
    }

    // Compile-time check that the erased trait is object-safe
    #[allow(dead_code)]
    fn assert_handler_object_safe(_: &dyn EventHandler) {}

    fn issued() -> AnyEvent {
        AnyEvent::new(InvoiceIssued {
            invoice_id: "inv-1".to_string(),
        })
    }

    #[tokio::test]
    async fn typed_handler_downcasts_and_delegates() {
        let ledger = Arc::new(Ledger {
            calls: AtomicUsize::new(0),
        });
        let handler = TypedHandler::<InvoiceIssued, _>::new(ledger.clone());

        handler.handle(issued()).await.unwrap();

        assert_eq!(ledger.calls.load(Ordering::SeqCst), 1);
        assert_eq!(EventHandler::name(&handler), "Ledger");
        assert!(!EventHandler::is_reentrant(&handler));
    }

    #[tokio::test]
    async fn typed_handler_rejects_wrong_event_type() {
        let handler = TypedHandler::<InvoiceIssued, _>::new(Arc::new(Ledger {
            calls: AtomicUsize::new(0),
        }));

        let err = handler
            .handle(AnyEvent::new(InvoicePaid {
                invoice_id: "inv-2".to_string(),
            }))
            .await
            .unwrap_err();

        assert_eq!(err.code, ErrorCode::InternalError);
    }

    #[test]
    fn typed_handlers_share_identity_of_wrapped_handler() {
        let ledger = Arc::new(Ledger {
            calls: AtomicUsize::new(0),
        });
        let a = TypedHandler::<InvoiceIssued, _>::new(ledger.clone());
        let b = TypedHandler::<InvoiceIssued, _>::new(ledger.clone());
        let other = TypedHandler::<InvoiceIssued, _>::new(Arc::new(Ledger {
            calls: AtomicUsize::new(0),
        }));

        assert_eq!(a.identity(), b.identity());
        assert_ne!(a.identity(), other.identity());
    }

    #[tokio::test]
    async fn handler_fn_invokes_closure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handler = handler_fn::<InvoiceIssued, _, _>("count-invoices", move |event| {
            let counter = counter.clone();
            async move {
                assert_eq!(event.invoice_id, "inv-1");
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        handler.handle(issued()).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(handler.name(), "count-invoices");
    }
}
