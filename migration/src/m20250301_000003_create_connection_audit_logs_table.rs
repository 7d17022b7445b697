use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ConnectionAuditLogs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ConnectionAuditLogs::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ConnectionAuditLogs::UserId).integer().not_null())
                    .col(
                        ColumnDef::new(ConnectionAuditLogs::Provider)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ConnectionAuditLogs::Action)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(ColumnDef::new(ConnectionAuditLogs::Details).text())
                    .col(
                        ColumnDef::new(ConnectionAuditLogs::CreatedAt)
                            .timestamp()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // 按用户 + 时间范围查询
        manager
            .create_index(
                Index::create()
                    .name("idx_connection_audit_logs_user_created")
                    .table(ConnectionAuditLogs::Table)
                    .col(ConnectionAuditLogs::UserId)
                    .col(ConnectionAuditLogs::CreatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_connection_audit_logs_action")
                    .table(ConnectionAuditLogs::Table)
                    .col(ConnectionAuditLogs::Action)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ConnectionAuditLogs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ConnectionAuditLogs {
    Table,
    Id,
    UserId,
    Provider,
    Action,
    Details,
    CreatedAt,
}
