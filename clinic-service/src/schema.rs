diesel::table! {
    products (id) {
        id -> Uuid,
        name -> Varchar,
        description -> Text,
        price -> Numeric,
        image_url -> Nullable<Varchar>,
        category -> Nullable<Varchar>,
        in_stock -> Bool,
        created_at -> Nullable<Timestamptz>,
        updated_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    services (id) {
        id -> Uuid,
        name -> Varchar,
        description -> Text,
        duration_minutes -> Int4,
        price -> Numeric,
        active -> Bool,
        created_at -> Nullable<Timestamptz>,
        updated_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    bookings (id) {
        id -> Uuid,
        patient_name -> Varchar,
        email -> Varchar,
        phone -> Nullable<Varchar>,
        service_id -> Nullable<Uuid>,
        scheduled_for -> Timestamptz,
        notes -> Nullable<Text>,
        status -> Varchar,
        created_at -> Nullable<Timestamptz>,
        updated_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    orders (id) {
        id -> Uuid,
        customer_name -> Varchar,
        email -> Varchar,
        phone -> Nullable<Varchar>,
        status -> Varchar,
        total_amount -> Numeric,
        created_at -> Nullable<Timestamptz>,
        updated_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    order_items (id) {
        id -> Uuid,
        order_id -> Uuid,
        product_id -> Uuid,
        quantity -> Int4,
        unit_price -> Numeric,
    }
}

diesel::table! {
    notifications (id) {
        id -> Uuid,
        kind -> Varchar,
        message -> Text,
        payload -> Nullable<Jsonb>,
        read -> Bool,
        created_at -> Nullable<Timestamptz>,
    }
}

diesel::joinable!(bookings -> services (service_id));
diesel::joinable!(order_items -> orders (order_id));
diesel::joinable!(order_items -> products (product_id));

diesel::allow_tables_to_appear_in_same_query!(
    products,
    services,
    bookings,
    orders,
    order_items,
    notifications,
);
