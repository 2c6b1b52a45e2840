use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240301_000001_create_customer_tables::Migration),
            Box::new(m20240301_000002_create_catalog_tables::Migration),
            Box::new(m20240301_000003_create_settlement_tables::Migration),
        ]
    }
}

mod m20240301_000001_create_customer_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000001_create_customer_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Customers::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Customers::Key).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Customers::Email).string().not_null())
                        .col(ColumnDef::new(Customers::Name).string().not_null())
                        .col(
                            ColumnDef::new(Customers::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Addresses::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Addresses::Key).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Addresses::CustomerKey).uuid().null())
                        .col(ColumnDef::new(Addresses::Recipient).string().not_null())
                        .col(ColumnDef::new(Addresses::Line1).string().not_null())
                        .col(ColumnDef::new(Addresses::Line2).string().null())
                        .col(ColumnDef::new(Addresses::City).string().not_null())
                        .col(ColumnDef::new(Addresses::Region).string().null())
                        .col(ColumnDef::new(Addresses::PostalCode).string().not_null())
                        .col(ColumnDef::new(Addresses::Country).string().not_null())
                        .col(ColumnDef::new(Addresses::Phone).string().null())
                        .col(
                            ColumnDef::new(Addresses::IsDefault)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(Addresses::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_addresses_customer_key")
                        .table(Addresses::Table)
                        .col(Addresses::CustomerKey)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Addresses::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Customers::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Customers {
        Table,
        Key,
        Email,
        Name,
        CreatedAt,
    }

    #[derive(DeriveIden)]
    enum Addresses {
        Table,
        Key,
        CustomerKey,
        Recipient,
        Line1,
        Line2,
        City,
        Region,
        PostalCode,
        Country,
        Phone,
        IsDefault,
        CreatedAt,
    }
}

mod m20240301_000002_create_catalog_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000002_create_catalog_tables"
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
                        .col(ColumnDef::new(Products::Key).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Products::Sku).string().not_null())
                        .col(ColumnDef::new(Products::Name).string().not_null())
                        .col(ColumnDef::new(Products::UnitPrice).big_integer().not_null())
                        .col(
                            ColumnDef::new(Products::TaxRateBps)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Coupons::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Coupons::Key).uuid().primary_key().not_null())
                        .col(
                            ColumnDef::new(Coupons::CodeHash)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Coupons::Kind).string_len(32).not_null())
                        .col(ColumnDef::new(Coupons::ProductKey).uuid().null())
                        .col(ColumnDef::new(Coupons::Target).big_integer().not_null())
                        .col(ColumnDef::new(Coupons::Reward).big_integer().not_null())
                        .col(ColumnDef::new(Coupons::MaxUses).integer().null())
                        .col(
                            ColumnDef::new(Coupons::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Coupons::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Products::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Products {
        Table,
        Key,
        Sku,
        Name,
        UnitPrice,
        TaxRateBps,
    }

    #[derive(DeriveIden)]
    enum Coupons {
        Table,
        Key,
        CodeHash,
        Kind,
        ProductKey,
        Target,
        Reward,
        MaxUses,
        CreatedAt,
    }
}

mod m20240301_000003_create_settlement_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000003_create_settlement_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Purchases::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Purchases::Key).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Purchases::CustomerKey).uuid().null())
                        .col(
                            ColumnDef::new(Purchases::PaymentIntentId)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Purchases::Amount).big_integer().not_null())
                        .col(
                            ColumnDef::new(Purchases::CouponDiscount)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Purchases::CouponCodeHash).string().null())
                        .col(ColumnDef::new(Purchases::Currency).string_len(3).not_null())
                        .col(ColumnDef::new(Purchases::Status).string_len(16).not_null())
                        .col(ColumnDef::new(Purchases::Email).string().null())
                        .col(ColumnDef::new(Purchases::AddressKey).uuid().null())
                        .col(
                            ColumnDef::new(Purchases::CreationTime)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Purchases::PurchaseTime)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Purchases::RefundTime)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(ColumnDef::new(Purchases::SettlementSnapshot).text().null())
                        .col(
                            ColumnDef::new(Purchases::SettlementPushedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(LineItems::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(LineItems::Key).uuid().primary_key().not_null())
                        .col(ColumnDef::new(LineItems::CustomerKey).uuid().null())
                        .col(ColumnDef::new(LineItems::ProductKey).uuid().not_null())
                        .col(ColumnDef::new(LineItems::PurchaseKey).uuid().null())
                        .col(ColumnDef::new(LineItems::UnitPrice).big_integer().not_null())
                        .col(ColumnDef::new(LineItems::TaxRateBps).integer().not_null())
                        .col(ColumnDef::new(LineItems::Quantity).integer().not_null())
                        .col(ColumnDef::new(LineItems::AddressKey).uuid().null())
                        .col(
                            ColumnDef::new(LineItems::ShippingStatus)
                                .string_len(16)
                                .not_null()
                                .default("none"),
                        )
                        .col(
                            ColumnDef::new(LineItems::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(LineItems::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(LineItems::ShippedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_line_items_purchase_key")
                                .from(LineItems::Table, LineItems::PurchaseKey)
                                .to(Purchases::Table, Purchases::Key)
                                .on_delete(ForeignKeyAction::Restrict),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_line_items_purchase_key")
                        .table(LineItems::Table)
                        .col(LineItems::PurchaseKey)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_line_items_customer_key")
                        .table(LineItems::Table)
                        .col(LineItems::CustomerKey)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(LineItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Purchases::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Purchases {
        Table,
        Key,
        CustomerKey,
        PaymentIntentId,
        Amount,
        CouponDiscount,
        CouponCodeHash,
        Currency,
        Status,
        Email,
        AddressKey,
        CreationTime,
        PurchaseTime,
        RefundTime,
        SettlementSnapshot,
        SettlementPushedAt,
    }

    #[derive(DeriveIden)]
    enum LineItems {
        Table,
        Key,
        CustomerKey,
        ProductKey,
        PurchaseKey,
        UnitPrice,
        TaxRateBps,
        Quantity,
        AddressKey,
        ShippingStatus,
        CreatedAt,
        UpdatedAt,
        ShippedAt,
    }
}
