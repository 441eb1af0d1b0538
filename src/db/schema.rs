// SQLite schema. Ids are UUID strings, timestamps RFC 3339 text.

diesel::table! {
    municipalities (id) {
        id -> Text,
        name -> Text,
        scraper_type -> Text,
        url -> Text,
        enabled -> Bool,
        created_at -> Text,
    }
}

diesel::table! {
    grounds (id) {
        id -> Text,
        municipality_id -> Text,
        name -> Text,
        court_pattern -> Nullable<Text>,
        enabled -> Bool,
        created_at -> Text,
    }
}

diesel::table! {
    teams (id) {
        id -> Text,
        name -> Text,
        email -> Text,
        status -> Text,
        created_at -> Text,
    }
}

diesel::table! {
    watch_conditions (id) {
        id -> Text,
        team_id -> Text,
        ground_id -> Text,
        days_of_week -> Text,
        time_from -> Text,
        time_to -> Text,
        date_from -> Nullable<Text>,
        date_to -> Nullable<Text>,
        enabled -> Bool,
        created_at -> Text,
    }
}

diesel::table! {
    slots (id) {
        id -> Text,
        municipality_id -> Text,
        ground_id -> Nullable<Text>,
        slot_date -> Text,
        time_from -> Text,
        time_to -> Text,
        court_name -> Text,
        raw_text -> Text,
        scraped_at -> Text,
    }
}

diesel::table! {
    scrape_jobs (id) {
        id -> Text,
        municipality_id -> Text,
        status -> Text,
        scrape_status -> Nullable<Text>,
        slots_found -> Integer,
        error_message -> Nullable<Text>,
        diagnostics -> Nullable<Text>,
        created_at -> Text,
        started_at -> Nullable<Text>,
        completed_at -> Nullable<Text>,
    }
}

diesel::table! {
    notifications (id) {
        id -> Text,
        team_id -> Text,
        watch_condition_id -> Text,
        slot_id -> Text,
        channel -> Text,
        status -> Text,
        created_at -> Text,
        sent_at -> Nullable<Text>,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    municipalities,
    grounds,
    teams,
    watch_conditions,
    slots,
    scrape_jobs,
    notifications,
);

diesel::joinable!(grounds -> municipalities (municipality_id));
diesel::joinable!(scrape_jobs -> municipalities (municipality_id));
diesel::joinable!(watch_conditions -> teams (team_id));
diesel::joinable!(watch_conditions -> grounds (ground_id));
