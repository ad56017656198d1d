use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Greylist::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Greylist::Id)
                            .integer()
                            .not_null()
                            .primary_key()
                            .auto_increment(),
                    )
                    .col(
                        ColumnDef::new(Greylist::ClientAddress)
                            .string_len(39)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Greylist::ClientName)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(ColumnDef::new(Greylist::Sender).string_len(320).not_null())
                    .col(
                        ColumnDef::new(Greylist::Recipient)
                            .string_len(320)
                            .not_null(),
                    )
                    .col(ColumnDef::new(Greylist::FirstSeen).timestamp().not_null())
                    .col(
                        ColumnDef::new(Greylist::SeenCount)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Greylist::AcceptedCount)
                            .big_integer()
                            .not_null(),
                    )
                    .clone(),
            )
            .await?;

        // Uniqueness over the triple keeps concurrent first observations of
        // the same triple from creating two rows.
        manager
            .create_index(
                Index::create()
                    .name("idx_greylist_triple")
                    .if_not_exists()
                    .table(Greylist::Table)
                    .col(Greylist::ClientAddress)
                    .col(Greylist::Sender)
                    .col(Greylist::Recipient)
                    .unique()
                    .clone(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Greylist::Table).clone())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum Greylist {
    Table,
    Id,
    ClientAddress,
    ClientName,
    Sender,
    Recipient,
    FirstSeen,
    SeenCount,
    AcceptedCount,
}
