//! Diesel table definitions.
//!
//! Tables: zapp_repositories, zapp_builds.

diesel::table! {
    zapp_repositories (id) {
        id -> Int8,
        name -> Varchar,
        local_path -> Varchar,
        remote_url -> Nullable<Varchar>,
        github_repo -> Nullable<Varchar>,
        default_branch -> Varchar,
        last_scheme -> Nullable<Varchar>,
        last_platform -> Nullable<Jsonb>,
        active -> Bool,
        create_date -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    zapp_builds (id) {
        id -> Int8,
        repository_id -> Int8,
        scheme -> Nullable<Varchar>,
        platform -> Nullable<Jsonb>,
        latest_revision -> Nullable<Varchar>,
        commit_log -> Text,
        log -> Text,
        status -> Varchar,
        start_date -> Nullable<Timestamptz>,
        start_timestamp -> Nullable<Float8>,
        end_date -> Nullable<Timestamptz>,
        end_timestamp -> Nullable<Float8>,
        create_date -> Nullable<Timestamptz>,
    }
}

diesel::joinable!(zapp_builds -> zapp_repositories (repository_id));

diesel::allow_tables_to_appear_in_same_query!(zapp_repositories, zapp_builds);
