use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240115_000001_create_payments_table::Migration),
            Box::new(m20240115_000002_create_payment_transactions_table::Migration),
        ]
    }
}

// Migration implementations

mod m20240115_000001_create_payments_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240115_000001_create_payments_table"
        }
    }

    // `async_trait` requires the impl to mirror the trait's elided
    // `&SchemaManager` lifetime; writing `<'_>` here fails E0195.
    #[allow(elided_lifetimes_in_paths)]
    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // Create payments table aligned with entities::payment Model
            manager
                .create_table(
                    Table::create()
                        .table(Payments::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Payments::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Payments::PayerId).uuid().not_null())
                        .col(ColumnDef::new(Payments::OrderType).string().not_null())
                        .col(ColumnDef::new(Payments::OrderId).uuid().not_null())
                        .col(ColumnDef::new(Payments::Amount).decimal().not_null())
                        .col(ColumnDef::new(Payments::Currency).string().not_null())
                        .col(ColumnDef::new(Payments::Method).string().not_null())
                        .col(ColumnDef::new(Payments::Provider).string().null())
                        .col(ColumnDef::new(Payments::Status).string().not_null())
                        .col(
                            ColumnDef::new(Payments::ProviderTransactionId)
                                .string()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Payments::RefundedAmount)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Payments::RefundedAt).timestamp().null())
                        .col(ColumnDef::new(Payments::RefundReason).string().null())
                        .col(ColumnDef::new(Payments::ActiveOrderKey).string().null())
                        .col(ColumnDef::new(Payments::FailureReason).string().null())
                        .col(ColumnDef::new(Payments::CreatedAt).timestamp().not_null())
                        .col(ColumnDef::new(Payments::UpdatedAt).timestamp().null())
                        .col(ColumnDef::new(Payments::CompletedAt).timestamp().null())
                        .col(ColumnDef::new(Payments::FailedAt).timestamp().null())
                        .col(
                            ColumnDef::new(Payments::Version)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .to_owned(),
                )
                .await?;

            // Reconciliation and uniqueness lookups
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_payments_order_ref")
                        .table(Payments::Table)
                        .col(Payments::OrderType)
                        .col(Payments::OrderId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_payments_status")
                        .table(Payments::Table)
                        .col(Payments::Status)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_payments_provider_transaction_id")
                        .table(Payments::Table)
                        .col(Payments::ProviderTransactionId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_payments_created_at")
                        .table(Payments::Table)
                        .col(Payments::CreatedAt)
                        .to_owned(),
                )
                .await?;

            // One live payment per order: the key is NULL once terminal, so
            // uniqueness only binds while Pending/Processing
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_payments_active_order_key")
                        .table(Payments::Table)
                        .col(Payments::ActiveOrderKey)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Payments::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Payments {
        Table,
        Id,
        PayerId,
        OrderType,
        OrderId,
        Amount,
        Currency,
        Method,
        Provider,
        Status,
        ProviderTransactionId,
        RefundedAmount,
        RefundedAt,
        RefundReason,
        ActiveOrderKey,
        FailureReason,
        CreatedAt,
        UpdatedAt,
        CompletedAt,
        FailedAt,
        Version,
    }
}

mod m20240115_000002_create_payment_transactions_table {

    use sea_orm_migration::prelude::*;

    use super::m20240115_000001_create_payments_table::Payments;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240115_000002_create_payment_transactions_table"
        }
    }

    // `async_trait` requires the impl to mirror the trait's elided
    // `&SchemaManager` lifetime; writing `<'_>` here fails E0195.
    #[allow(elided_lifetimes_in_paths)]
    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // Create payment_transactions table aligned with
            // entities::payment_transaction Model
            manager
                .create_table(
                    Table::create()
                        .table(PaymentTransactions::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(PaymentTransactions::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PaymentTransactions::PaymentId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PaymentTransactions::TransactionType)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PaymentTransactions::Amount)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(PaymentTransactions::Status)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PaymentTransactions::ProviderTransactionId)
                                .string()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(PaymentTransactions::ErrorCode)
                                .string()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(PaymentTransactions::ErrorMessage)
                                .string()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(PaymentTransactions::CreatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PaymentTransactions::ProcessedAt)
                                .timestamp()
                                .null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_payment_transactions_payment_id")
                                .from(
                                    PaymentTransactions::Table,
                                    PaymentTransactions::PaymentId,
                                )
                                .to(Payments::Table, Payments::Id)
                                .on_delete(ForeignKeyAction::Cascade)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_payment_transactions_payment_id")
                        .table(PaymentTransactions::Table)
                        .col(PaymentTransactions::PaymentId)
                        .to_owned(),
                )
                .await?;

            // Replay barrier: one durable entry per remote event. NULL
            // references do not collide, so internally-generated entries
            // without a remote id stay unconstrained here.
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_payment_transactions_dedup")
                        .table(PaymentTransactions::Table)
                        .col(PaymentTransactions::PaymentId)
                        .col(PaymentTransactions::ProviderTransactionId)
                        .col(PaymentTransactions::TransactionType)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(
                    Table::drop()
                        .table(PaymentTransactions::Table)
                        .to_owned(),
                )
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum PaymentTransactions {
        Table,
        Id,
        PaymentId,
        TransactionType,
        Amount,
        Status,
        ProviderTransactionId,
        ErrorCode,
        ErrorMessage,
        CreatedAt,
        ProcessedAt,
    }
}
