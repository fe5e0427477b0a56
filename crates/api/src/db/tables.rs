//! Compile-time–checked column identifiers for all tables.

use sea_query::Iden;

#[derive(Iden)]
pub enum Users {
    Table,
    Id,
    CodehostUserId,
    Login,
    DisplayName,
    Email,
    Tier,
    QuotaOverride,
    CreatedAt,
}

#[derive(Iden)]
pub enum UserRepos {
    Table,
    UserId,
    RepoFullName,
    Enabled,
    WebhookSecret,
    CreatedAt,
}

#[derive(Iden)]
pub enum OauthTokens {
    Table,
    Subject,
    AccessToken,
    RefreshToken,
    ExpiresAt,
    Scopes,
    UpdatedAt,
}

#[derive(Iden)]
pub enum CodehostTokens {
    Table,
    Subject,
    AccessToken,
    RefreshToken,
    ExpiresAt,
    Scopes,
    UpdatedAt,
}

#[derive(Iden)]
pub enum RepoContexts {
    Table,
    RepoFullName,
    Languages,
    Frameworks,
    KeyDirectories,
    ReadmeSummary,
    UpdatedAt,
}

#[derive(Iden)]
pub enum PostedCommits {
    Table,
    CommitSha,
    RepoFullName,
    PostId,
    CreatedAt,
}

#[derive(Iden)]
pub enum OgPosts {
    Table,
    RepoFullName,
    PostId,
    UpdatedAt,
}

#[derive(Iden)]
pub enum ApiUsage {
    Table,
    UserId,
    Endpoint,
    HourBucket,
    Count,
}

#[derive(Iden)]
pub enum PromptTemplates {
    Table,
    UserId,
    Name,
    Body,
    Active,
    CreatedAt,
}

#[derive(Iden)]
pub enum QueueItems {
    Table,
    Id,
    Kind,
    UserId,
    Payload,
    Priority,
    Status,
    RetryCount,
    CreatedAt,
    UpdatedAt,
    LastError,
}

#[derive(Iden)]
pub enum OauthStates {
    Table,
    State,
    Provider,
    Subject,
    CodeVerifier,
    ExpiresAt,
    CreatedAt,
}
