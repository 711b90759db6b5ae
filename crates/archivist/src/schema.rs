// Mirrors the tables created by `crate::migrations`.

diesel::table! {
    links (id) {
        id -> Text,
        url -> Text,
        domain -> Text,
        tags -> Text,
        title -> Nullable<Text>,
        created_at -> Text,
        status -> Text,
        retry_at -> Nullable<Text>,
        end_ts -> Nullable<Text>,
        tie_break -> Text,
        options -> Text,
    }
}

diesel::table! {
    jobs (id) {
        id -> Text,
        link_id -> Text,
        extractor -> Text,
        status -> Text,
        retries -> Integer,
        cmd -> Text,
        cmd_version -> Nullable<Text>,
        pwd -> Nullable<Text>,
        output -> Nullable<Text>,
        error -> Nullable<Text>,
        created_at -> Text,
        start_ts -> Nullable<Text>,
        end_ts -> Nullable<Text>,
        retry_at -> Nullable<Text>,
        tie_break -> Text,
    }
}

diesel::table! {
    archive_results (id) {
        id -> Integer,
        link_id -> Text,
        extractor -> Text,
        timestamp -> Text,
        status -> Text,
        duration_ms -> BigInt,
        cmd -> Text,
        cmd_version -> Nullable<Text>,
        output -> Nullable<Text>,
        error -> Nullable<Text>,
    }
}

diesel::table! {
    latest_outputs (link_id, extractor) {
        link_id -> Text,
        extractor -> Text,
        output -> Text,
        updated_at -> Text,
    }
}

diesel::joinable!(jobs -> links (link_id));
diesel::joinable!(archive_results -> links (link_id));
diesel::joinable!(latest_outputs -> links (link_id));

diesel::allow_tables_to_appear_in_same_query!(archive_results, jobs, latest_outputs, links,);
