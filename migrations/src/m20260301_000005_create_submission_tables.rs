use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ContactMessages::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ContactMessages::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ContactMessages::Name).string_len(255).not_null())
                    .col(ColumnDef::new(ContactMessages::Email).string_len(255).not_null())
                    .col(ColumnDef::new(ContactMessages::Phone).string_len(32).null())
                    .col(ColumnDef::new(ContactMessages::Subject).string_len(255).null())
                    .col(ColumnDef::new(ContactMessages::Message).text().not_null())
                    .col(ColumnDef::new(ContactMessages::IpAddress).string_len(64).null())
                    .col(
                        ColumnDef::new(ContactMessages::ContentHash)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ContactMessages::IsDuplicate)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(ContactMessages::DuplicateOf).uuid().null())
                    .col(
                        ColumnDef::new(ContactMessages::SpamScore)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ContactMessages::SpamReasons)
                            .text()
                            .not_null()
                            .default("[]"),
                    )
                    .col(
                        ColumnDef::new(ContactMessages::Status)
                            .string_len(16)
                            .not_null()
                            .default("new"),
                    )
                    .col(ColumnDef::new(ContactMessages::AssignedTo).string_len(255).null())
                    .col(ColumnDef::new(ContactMessages::Response).text().null())
                    .col(
                        ColumnDef::new(ContactMessages::RespondedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ContactMessages::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ContactMessages::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(SampleRequests::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SampleRequests::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(SampleRequests::Name).string_len(255).not_null())
                    .col(ColumnDef::new(SampleRequests::Email).string_len(255).not_null())
                    .col(ColumnDef::new(SampleRequests::Phone).string_len(32).null())
                    .col(
                        ColumnDef::new(SampleRequests::AddressLine)
                            .string_len(512)
                            .not_null(),
                    )
                    .col(ColumnDef::new(SampleRequests::City).string_len(128).not_null())
                    .col(ColumnDef::new(SampleRequests::Country).string_len(64).not_null())
                    .col(
                        ColumnDef::new(SampleRequests::RequestedProducts)
                            .text()
                            .not_null(),
                    )
                    .col(ColumnDef::new(SampleRequests::Message).text().null())
                    .col(ColumnDef::new(SampleRequests::IpAddress).string_len(64).null())
                    .col(
                        ColumnDef::new(SampleRequests::ContentHash)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SampleRequests::IsDuplicate)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(SampleRequests::DuplicateOf).uuid().null())
                    .col(
                        ColumnDef::new(SampleRequests::Status)
                            .string_len(16)
                            .not_null()
                            .default("pending"),
                    )
                    .col(ColumnDef::new(SampleRequests::AssignedTo).string_len(255).null())
                    .col(ColumnDef::new(SampleRequests::Response).text().null())
                    .col(
                        ColumnDef::new(SampleRequests::RespondedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SampleRequests::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SampleRequests::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(SubmissionHistory::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SubmissionHistory::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(SubmissionHistory::SubmissionKind)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SubmissionHistory::SubmissionId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SubmissionHistory::Action)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SubmissionHistory::FromStatus)
                            .string_len(16)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SubmissionHistory::ToStatus)
                            .string_len(16)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SubmissionHistory::Actor)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(ColumnDef::new(SubmissionHistory::Detail).text().null())
                    .col(
                        ColumnDef::new(SubmissionHistory::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(SubmissionNotes::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SubmissionNotes::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(SubmissionNotes::SubmissionKind)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SubmissionNotes::SubmissionId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SubmissionNotes::Author)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(ColumnDef::new(SubmissionNotes::Body).text().not_null())
                    .col(
                        ColumnDef::new(SubmissionNotes::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // Duplicate-window lookups.
        manager
            .create_index(
                Index::create()
                    .name("idx_contact_messages_hash_created")
                    .table(ContactMessages::Table)
                    .col(ContactMessages::ContentHash)
                    .col(ContactMessages::CreatedAt)
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .name("idx_sample_requests_hash_created")
                    .table(SampleRequests::Table)
                    .col(SampleRequests::ContentHash)
                    .col(SampleRequests::CreatedAt)
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .name("idx_contact_messages_ip_created")
                    .table(ContactMessages::Table)
                    .col(ContactMessages::IpAddress)
                    .col(ContactMessages::CreatedAt)
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .name("idx_submission_history_subject")
                    .table(SubmissionHistory::Table)
                    .col(SubmissionHistory::SubmissionKind)
                    .col(SubmissionHistory::SubmissionId)
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .name("idx_submission_notes_subject")
                    .table(SubmissionNotes::Table)
                    .col(SubmissionNotes::SubmissionKind)
                    .col(SubmissionNotes::SubmissionId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SubmissionNotes::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(SubmissionHistory::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(SampleRequests::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ContactMessages::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum ContactMessages {
    Table,
    Id,
    Name,
    Email,
    Phone,
    Subject,
    Message,
    IpAddress,
    ContentHash,
    IsDuplicate,
    DuplicateOf,
    SpamScore,
    SpamReasons,
    Status,
    AssignedTo,
    Response,
    RespondedAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum SampleRequests {
    Table,
    Id,
    Name,
    Email,
    Phone,
    AddressLine,
    City,
    Country,
    RequestedProducts,
    Message,
    IpAddress,
    ContentHash,
    IsDuplicate,
    DuplicateOf,
    Status,
    AssignedTo,
    Response,
    RespondedAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum SubmissionHistory {
    Table,
    Id,
    SubmissionKind,
    SubmissionId,
    Action,
    FromStatus,
    ToStatus,
    Actor,
    Detail,
    CreatedAt,
}

#[derive(DeriveIden)]
enum SubmissionNotes {
    Table,
    Id,
    SubmissionKind,
    SubmissionId,
    Author,
    Body,
    CreatedAt,
}
