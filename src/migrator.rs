use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240101_000001_create_users_table::Migration),
            Box::new(m20240101_000002_create_catalog_tables::Migration),
            Box::new(m20240101_000003_create_promo_codes_table::Migration),
            Box::new(m20240101_000004_create_orders_tables::Migration),
        ]
    }
}

mod m20240101_000001_create_users_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000001_create_users_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Users::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Users::Id).uuid().not_null().primary_key())
                        .col(ColumnDef::new(Users::Email).string().not_null())
                        .col(ColumnDef::new(Users::Name).string().not_null())
                        .col(
                            ColumnDef::new(Users::IsDeleted)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(Users::IsBanned)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(ColumnDef::new(Users::MembershipPlanKey).string().null())
                        .col(
                            ColumnDef::new(Users::MembershipStatus)
                                .string_len(16)
                                .not_null()
                                .default("none"),
                        )
                        .col(ColumnDef::new(Users::MembershipStartedAt).timestamp_with_time_zone().null())
                        .col(ColumnDef::new(Users::MembershipExpiresAt).timestamp_with_time_zone().null())
                        .col(ColumnDef::new(Users::UsagePeriodStart).timestamp_with_time_zone().null())
                        .col(
                            ColumnDef::new(Users::UsageDownloads)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Users::UsageRemixRequests)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Users::CreatedAt).timestamp_with_time_zone().not_null())
                        .col(ColumnDef::new(Users::UpdatedAt).timestamp_with_time_zone().not_null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(UserProducts::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(UserProducts::Id)
                                .uuid()
                                .not_null()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(UserProducts::UserId).uuid().not_null())
                        .col(ColumnDef::new(UserProducts::ProductId).uuid().not_null())
                        .col(ColumnDef::new(UserProducts::Source).string_len(16).not_null())
                        .col(ColumnDef::new(UserProducts::OrderId).uuid().null())
                        .col(
                            ColumnDef::new(UserProducts::AcquiredAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_user_products_user")
                                .from(UserProducts::Table, UserProducts::UserId)
                                .to(Users::Table, Users::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            // Union semantics of the owned set are enforced here.
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_user_products_user_product")
                        .table(UserProducts::Table)
                        .col(UserProducts::UserId)
                        .col(UserProducts::ProductId)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(UserProducts::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Users::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Users {
        Table,
        Id,
        Email,
        Name,
        IsDeleted,
        IsBanned,
        MembershipPlanKey,
        MembershipStatus,
        MembershipStartedAt,
        MembershipExpiresAt,
        UsagePeriodStart,
        UsageDownloads,
        UsageRemixRequests,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum UserProducts {
        Table,
        Id,
        UserId,
        ProductId,
        Source,
        OrderId,
        AcquiredAt,
    }
}

mod m20240101_000002_create_catalog_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000002_create_catalog_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Products::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Products::Id).uuid().not_null().primary_key())
                        .col(
                            ColumnDef::new(Products::Slug)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Products::Title).string().not_null())
                        .col(ColumnDef::new(Products::Price).decimal_len(16, 4).not_null())
                        .col(ColumnDef::new(Products::Mrp).decimal_len(16, 4).not_null())
                        .col(ColumnDef::new(Products::Currency).string_len(3).not_null())
                        .col(ColumnDef::new(Products::Format).string_len(16).not_null())
                        .col(
                            ColumnDef::new(Products::IsPublic)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(ColumnDef::new(Products::CreatedAt).timestamp_with_time_zone().not_null())
                        .col(ColumnDef::new(Products::UpdatedAt).timestamp_with_time_zone().not_null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(MembershipPlans::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(MembershipPlans::Key)
                                .string_len(64)
                                .not_null()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(MembershipPlans::Name).string().not_null())
                        .col(
                            ColumnDef::new(MembershipPlans::Price)
                                .decimal_len(16, 4)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(MembershipPlans::Currency)
                                .string_len(3)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(MembershipPlans::MaxDownloadsPerMonth)
                                .integer()
                                .null(),
                        )
                        .col(ColumnDef::new(MembershipPlans::AllowedFormats).json().not_null())
                        .col(
                            ColumnDef::new(MembershipPlans::CommercialUse)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(MembershipPlans::RemixRequestQuota)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(MembershipPlans::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(MembershipPlans::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(MembershipPlans::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Products::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Products {
        Table,
        Id,
        Slug,
        Title,
        Price,
        Mrp,
        Currency,
        Format,
        IsPublic,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum MembershipPlans {
        Table,
        Key,
        Name,
        Price,
        Currency,
        MaxDownloadsPerMonth,
        AllowedFormats,
        CommercialUse,
        RemixRequestQuota,
        IsActive,
        CreatedAt,
    }
}

mod m20240101_000003_create_promo_codes_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000003_create_promo_codes_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(PromoCodes::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(PromoCodes::Id).uuid().not_null().primary_key())
                        .col(
                            ColumnDef::new(PromoCodes::Code)
                                .string_len(64)
                                .not_null()
                                .unique_key(),
                        )
                        .col(
                            ColumnDef::new(PromoCodes::DiscountType)
                                .string_len(16)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PromoCodes::DiscountValue)
                                .decimal_len(16, 4)
                                .not_null(),
                        )
                        .col(ColumnDef::new(PromoCodes::MaxDiscount).decimal_len(16, 4).null())
                        .col(
                            ColumnDef::new(PromoCodes::MinOrderAmount)
                                .decimal_len(16, 4)
                                .null(),
                        )
                        .col(ColumnDef::new(PromoCodes::UsageLimit).integer().null())
                        .col(
                            ColumnDef::new(PromoCodes::UsedCount)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(PromoCodes::ExpiresAt).timestamp_with_time_zone().null())
                        .col(
                            ColumnDef::new(PromoCodes::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(ColumnDef::new(PromoCodes::CreatedAt).timestamp_with_time_zone().not_null())
                        .col(ColumnDef::new(PromoCodes::UpdatedAt).timestamp_with_time_zone().not_null())
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(PromoCodes::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum PromoCodes {
        Table,
        Id,
        Code,
        DiscountType,
        DiscountValue,
        MaxDiscount,
        MinOrderAmount,
        UsageLimit,
        UsedCount,
        ExpiresAt,
        IsActive,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240101_000004_create_orders_tables {
    use super::m20240101_000001_create_users_table::Users;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000004_create_orders_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Orders::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Orders::Id).uuid().not_null().primary_key())
                        .col(ColumnDef::new(Orders::UserId).uuid().not_null())
                        .col(ColumnDef::new(Orders::Kind).string_len(16).not_null())
                        .col(ColumnDef::new(Orders::MembershipPlanKey).string_len(64).null())
                        .col(ColumnDef::new(Orders::MembershipMonths).integer().null())
                        .col(ColumnDef::new(Orders::Currency).string_len(3).not_null())
                        .col(ColumnDef::new(Orders::Subtotal).decimal_len(16, 4).not_null())
                        .col(
                            ColumnDef::new(Orders::Tax)
                                .decimal_len(16, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Orders::Discount)
                                .decimal_len(16, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Orders::ConvenienceFee)
                                .decimal_len(16, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Orders::Total).decimal_len(16, 4).not_null())
                        .col(ColumnDef::new(Orders::PromoCode).string_len(64).null())
                        .col(ColumnDef::new(Orders::Status).string_len(20).not_null())
                        .col(ColumnDef::new(Orders::CancelReason).string_len(32).null())
                        .col(ColumnDef::new(Orders::RemoteOrderId).string().null())
                        .col(ColumnDef::new(Orders::PaymentId).string().null())
                        .col(ColumnDef::new(Orders::PaymentSignature).string().null())
                        .col(ColumnDef::new(Orders::GatewayPayload).json().null())
                        .col(ColumnDef::new(Orders::RefundId).string().null())
                        .col(ColumnDef::new(Orders::PaymentErrors).json().null())
                        .col(ColumnDef::new(Orders::CompletedAt).timestamp_with_time_zone().null())
                        .col(ColumnDef::new(Orders::RefundedAt).timestamp_with_time_zone().null())
                        .col(ColumnDef::new(Orders::CreatedAt).timestamp_with_time_zone().not_null())
                        .col(ColumnDef::new(Orders::UpdatedAt).timestamp_with_time_zone().not_null())
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_orders_user")
                                .from(Orders::Table, Orders::UserId)
                                .to(Users::Table, Users::Id),
                        )
                        .to_owned(),
                )
                .await?;

            for (name, col) in [
                ("idx_orders_user_id", Orders::UserId),
                ("idx_orders_remote_order_id", Orders::RemoteOrderId),
                ("idx_orders_payment_id", Orders::PaymentId),
            ] {
                manager
                    .create_index(
                        Index::create()
                            .if_not_exists()
                            .name(name)
                            .table(Orders::Table)
                            .col(col)
                            .to_owned(),
                    )
                    .await?;
            }

            // Reaper sweep: status = pending AND created_at <= cutoff
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_status_created_at")
                        .table(Orders::Table)
                        .col(Orders::Status)
                        .col(Orders::CreatedAt)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(OrderItems::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(OrderItems::Id).uuid().not_null().primary_key())
                        .col(ColumnDef::new(OrderItems::OrderId).uuid().not_null())
                        .col(ColumnDef::new(OrderItems::ProductId).uuid().not_null())
                        .col(ColumnDef::new(OrderItems::Position).integer().not_null())
                        .col(ColumnDef::new(OrderItems::Title).string().not_null())
                        .col(ColumnDef::new(OrderItems::Price).decimal_len(16, 4).not_null())
                        .col(ColumnDef::new(OrderItems::Mrp).decimal_len(16, 4).not_null())
                        .col(ColumnDef::new(OrderItems::Currency).string_len(3).not_null())
                        .col(
                            ColumnDef::new(OrderItems::DiscountPercent)
                                .decimal_len(16, 4)
                                .not_null()
                                .default(0),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_order_items_order")
                                .from(OrderItems::Table, OrderItems::OrderId)
                                .to(Orders::Table, Orders::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_order_items_order_id")
                        .table(OrderItems::Table)
                        .col(OrderItems::OrderId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(OrderItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Orders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden, Clone, Copy)]
    enum Orders {
        Table,
        Id,
        UserId,
        Kind,
        MembershipPlanKey,
        MembershipMonths,
        Currency,
        Subtotal,
        Tax,
        Discount,
        ConvenienceFee,
        Total,
        PromoCode,
        Status,
        CancelReason,
        RemoteOrderId,
        PaymentId,
        PaymentSignature,
        GatewayPayload,
        RefundId,
        PaymentErrors,
        CompletedAt,
        RefundedAt,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum OrderItems {
        Table,
        Id,
        OrderId,
        ProductId,
        Position,
        Title,
        Price,
        Mrp,
        Currency,
        DiscountPercent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{ConnectOptions, Database};

    #[tokio::test]
    async fn applies_and_reverts_on_sqlite() {
        let mut opts = ConnectOptions::new("sqlite::memory:");
        opts.max_connections(1).min_connections(1);
        let db = Database::connect(opts).await.unwrap();
        Migrator::up(&db, None).await.unwrap();

        let manager = SchemaManager::new(&db);
        for table in ["users", "products", "membership_plans", "promo_codes", "orders", "order_items"] {
            assert!(manager.has_table(table).await.unwrap(), "missing table {}", table);
        }

        Migrator::down(&db, None).await.unwrap();
        assert!(!manager.has_table("orders").await.unwrap());
        Migrator::up(&db, None).await.unwrap();
    }
}
