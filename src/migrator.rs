use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260101_000001_create_slots_table::Migration),
            Box::new(m20260101_000002_create_orders_table::Migration),
            Box::new(m20260101_000003_create_bookings_table::Migration),
            Box::new(m20260101_000004_create_tax_rates_table::Migration),
        ]
    }
}

// Migration implementations

mod m20260101_000001_create_slots_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20260101_000001_create_slots_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // Create slots table aligned with entities::slot Model
            manager
                .create_table(
                    Table::create()
                        .table(Slots::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Slots::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Slots::StartAt).timestamp().not_null())
                        .col(ColumnDef::new(Slots::EndAt).timestamp().not_null())
                        .col(ColumnDef::new(Slots::CreatedAt).timestamp().not_null())
                        .col(ColumnDef::new(Slots::CreatedById).uuid().not_null())
                        .col(
                            ColumnDef::new(Slots::Price)
                                .decimal_len(19, 6)
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Slots::Reduction).integer().null())
                        .col(ColumnDef::new(Slots::Kind).string_len(20).not_null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_slots_created_by_id")
                        .table(Slots::Table)
                        .col(Slots::CreatedById)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_slots_start_at")
                        .table(Slots::Table)
                        .col(Slots::StartAt)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Slots::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Slots {
        Table,
        Id,
        StartAt,
        EndAt,
        CreatedAt,
        CreatedById,
        Price,
        Reduction,
        Kind,
    }
}

mod m20260101_000002_create_orders_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20260101_000002_create_orders_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // Create orders table aligned with entities::order Model
            manager
                .create_table(
                    Table::create()
                        .table(Orders::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Orders::Id).uuid().primary_key().not_null())
                        .col(
                            ColumnDef::new(Orders::OrderNumber)
                                .string_len(50)
                                .not_null(),
                        )
                        .col(ColumnDef::new(Orders::BookerId).uuid().not_null())
                        .col(ColumnDef::new(Orders::Status).string_len(32).not_null())
                        .col(ColumnDef::new(Orders::CreatedAt).timestamp().not_null())
                        .col(ColumnDef::new(Orders::UpdatedAt).timestamp().not_null())
                        .col(ColumnDef::new(Orders::CheckoutSessionId).string().null())
                        .col(ColumnDef::new(Orders::CheckoutExpiresAt).timestamp().null())
                        .col(ColumnDef::new(Orders::PaymentMethod).string().null())
                        .col(ColumnDef::new(Orders::PaymentIntentId).string().null())
                        .col(ColumnDef::new(Orders::PaidAt).timestamp().null())
                        .col(ColumnDef::new(Orders::TotalOriginal).decimal_len(19, 6).null())
                        .col(
                            ColumnDef::new(Orders::TotalDiscounted)
                                .decimal_len(19, 6)
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Orders::TotalReduction)
                                .decimal_len(19, 6)
                                .null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("uq_orders_order_number")
                        .table(Orders::Table)
                        .col(Orders::OrderNumber)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_status_checkout_expires_at")
                        .table(Orders::Table)
                        .col(Orders::Status)
                        .col(Orders::CheckoutExpiresAt)
                        .to_owned(),
                )
                .await?;

            // At most one open (pending / waiting_for_payment) order per student.
            // sea-query has no portable partial-index builder, so this goes
            // through raw SQL; the syntax is shared by PostgreSQL and SQLite.
            manager
                .get_connection()
                .execute_unprepared(
                    "CREATE UNIQUE INDEX IF NOT EXISTS uq_orders_open_booker \
                     ON orders (booker_id) \
                     WHERE status IN ('pending', 'waiting_for_payment')",
                )
                .await?;

            Ok(())
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Orders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Orders {
        Table,
        Id,
        OrderNumber,
        BookerId,
        Status,
        CreatedAt,
        UpdatedAt,
        CheckoutSessionId,
        CheckoutExpiresAt,
        PaymentMethod,
        PaymentIntentId,
        PaidAt,
        TotalOriginal,
        TotalDiscounted,
        TotalReduction,
    }
}

mod m20260101_000003_create_bookings_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20260101_000003_create_bookings_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // Create bookings table aligned with entities::booking Model
            manager
                .create_table(
                    Table::create()
                        .table(Bookings::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Bookings::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Bookings::SlotId).uuid().not_null())
                        .col(ColumnDef::new(Bookings::BookedById).uuid().not_null())
                        .col(ColumnDef::new(Bookings::CreatedAt).timestamp().not_null())
                        .col(ColumnDef::new(Bookings::Subject).string().null())
                        .col(ColumnDef::new(Bookings::Description).string().null())
                        .col(ColumnDef::new(Bookings::HelpKind).string().null())
                        .col(ColumnDef::new(Bookings::OrderId).uuid().null())
                        .col(ColumnDef::new(Bookings::CancelledAt).timestamp().null())
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_bookings_slot_id")
                                .from(Bookings::Table, Bookings::SlotId)
                                .to(
                                    super::m20260101_000001_create_slots_table::Slots::Table,
                                    super::m20260101_000001_create_slots_table::Slots::Id,
                                )
                                // Only cancelled bookings can still reference a
                                // slot by the time a delete is allowed; they go
                                // with it.
                                .on_delete(ForeignKeyAction::Cascade)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_bookings_order_id")
                                .from(Bookings::Table, Bookings::OrderId)
                                .to(
                                    super::m20260101_000002_create_orders_table::Orders::Table,
                                    super::m20260101_000002_create_orders_table::Orders::Id,
                                )
                                // Orders are never deleted, only transitioned.
                                .on_delete(ForeignKeyAction::Restrict)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_bookings_booked_by_id")
                        .table(Bookings::Table)
                        .col(Bookings::BookedById)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_bookings_order_id")
                        .table(Bookings::Table)
                        .col(Bookings::OrderId)
                        .to_owned(),
                )
                .await?;

            // The double-booking guard. One live booking per slot, enforced by
            // the storage engine itself; a racing insert observes a unique
            // violation rather than corrupting state.
            manager
                .get_connection()
                .execute_unprepared(
                    "CREATE UNIQUE INDEX IF NOT EXISTS uq_bookings_live_slot \
                     ON bookings (slot_id) \
                     WHERE cancelled_at IS NULL",
                )
                .await?;

            Ok(())
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Bookings::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Bookings {
        Table,
        Id,
        SlotId,
        BookedById,
        CreatedAt,
        Subject,
        Description,
        HelpKind,
        OrderId,
        CancelledAt,
    }
}

mod m20260101_000004_create_tax_rates_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20260101_000004_create_tax_rates_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(TaxRates::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(TaxRates::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(TaxRates::Percent)
                                .decimal_len(19, 6)
                                .not_null(),
                        )
                        .col(ColumnDef::new(TaxRates::StartsAt).timestamp().not_null())
                        .col(ColumnDef::new(TaxRates::CreatedAt).timestamp().not_null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_tax_rates_starts_at")
                        .table(TaxRates::Table)
                        .col(TaxRates::StartsAt)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(TaxRates::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum TaxRates {
        Table,
        Id,
        Percent,
        StartsAt,
        CreatedAt,
    }
}
