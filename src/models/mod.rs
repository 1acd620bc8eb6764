pub mod payment;

pub use payment::{
    OrderRef, OrderType, PaymentEvent, PaymentKind, PaymentMethod, PaymentProvider, PaymentStatus,
    Transition, TransactionType,
};
