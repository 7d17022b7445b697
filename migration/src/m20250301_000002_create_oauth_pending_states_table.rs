use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(OAuthPendingStates::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(OAuthPendingStates::State)
                            .string_len(128)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(OAuthPendingStates::UserId).integer().not_null())
                    .col(
                        ColumnDef::new(OAuthPendingStates::Provider)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(ColumnDef::new(OAuthPendingStates::RedirectUri).text().not_null())
                    .col(ColumnDef::new(OAuthPendingStates::Extra).text())
                    .col(
                        ColumnDef::new(OAuthPendingStates::IssuedAt)
                            .timestamp()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(OAuthPendingStates::ExpiresAt)
                            .timestamp()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_oauth_pending_states_expires_at")
                    .table(OAuthPendingStates::Table)
                    .col(OAuthPendingStates::ExpiresAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(OAuthPendingStates::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum OAuthPendingStates {
    #[sea_orm(iden = "oauth_pending_states")]
    Table,
    State,
    UserId,
    Provider,
    RedirectUri,
    Extra,
    IssuedAt,
    ExpiresAt,
}
