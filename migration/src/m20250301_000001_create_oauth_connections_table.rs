use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(OAuthConnections::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(OAuthConnections::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(OAuthConnections::UserId).integer().not_null())
                    .col(
                        ColumnDef::new(OAuthConnections::Provider)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(ColumnDef::new(OAuthConnections::AccessToken).text().not_null())
                    .col(
                        ColumnDef::new(OAuthConnections::AccessTokenNonce)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(ColumnDef::new(OAuthConnections::RefreshToken).text())
                    .col(ColumnDef::new(OAuthConnections::RefreshTokenNonce).string_len(32))
                    .col(ColumnDef::new(OAuthConnections::ExpiresAt).timestamp())
                    .col(ColumnDef::new(OAuthConnections::Scope).text())
                    .col(ColumnDef::new(OAuthConnections::Extra).text())
                    .col(
                        ColumnDef::new(OAuthConnections::NeedsReauth)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(OAuthConnections::CreatedAt)
                            .timestamp()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(OAuthConnections::UpdatedAt)
                            .timestamp()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // upsert 依赖这个唯一索引作为冲突目标
        manager
            .create_index(
                Index::create()
                    .name("idx_oauth_connections_user_provider")
                    .table(OAuthConnections::Table)
                    .col(OAuthConnections::UserId)
                    .col(OAuthConnections::Provider)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_oauth_connections_expires_at")
                    .table(OAuthConnections::Table)
                    .col(OAuthConnections::ExpiresAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(OAuthConnections::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum OAuthConnections {
    #[sea_orm(iden = "oauth_connections")]
    Table,
    Id,
    UserId,
    Provider,
    AccessToken,
    AccessTokenNonce,
    RefreshToken,
    RefreshTokenNonce,
    ExpiresAt,
    Scope,
    Extra,
    NeedsReauth,
    CreatedAt,
    UpdatedAt,
}
