pub struct Metric {
    pub name: &'static str,
    description: &'static str,
}

pub const COUNTERS: [Metric; 6] = [
    PUBLISHED_MESSAGES_TOTAL,
    PUBLISH_FAILURES_TOTAL,
    PUBLISH_RETRIES_TOTAL,
    CONSUMED_MESSAGES_TOTAL,
    DEAD_LETTERED_MESSAGES_TOTAL,
    RECONNECTS_TOTAL,
];
pub const GAUGES: [Metric; 1] = [BROKER_CONNECTED];

// PUBLISHER Metrics --------------------------

pub const PUBLISHED_MESSAGES_TOTAL: Metric = Metric {
    name: "depot_published_messages_total",
    description: "Total number of deployment events accepted by the broker",
};

pub const PUBLISH_FAILURES_TOTAL: Metric = Metric {
    name: "depot_publish_failures_total",
    description: "Total number of publish calls that failed permanently",
};

pub const PUBLISH_RETRIES_TOTAL: Metric = Metric {
    name: "depot_publish_retries_total",
    description: "Total number of publish attempts retried after a transport failure",
};

// CONSUMER Metrics --------------------------

pub const CONSUMED_MESSAGES_TOTAL: Metric = Metric {
    name: "depot_consumed_messages_total",
    description: "Total number of deployment events processed and acknowledged",
};

pub const DEAD_LETTERED_MESSAGES_TOTAL: Metric = Metric {
    name: "depot_dead_lettered_messages_total",
    description: "Total number of deliveries rejected without requeue",
};

pub const RECONNECTS_TOTAL: Metric = Metric {
    name: "depot_consumer_reconnects_total",
    description: "Total number of consumer reconnects after a transport failure",
};

pub const BROKER_CONNECTED: Metric = Metric {
    name: "depot_consumer_broker_connected",
    description: "Whether the consumer holds an open broker connection (0=no,1=yes)",
};

/// Describes every depot metric to the installed recorder.
pub fn register_metrics() {
    for metric in COUNTERS {
        register_counter(metric)
    }
    for metric in GAUGES {
        register_gauge(metric)
    }
}

/// Registers a counter with the given name.
fn register_counter(metric: Metric) {
    metrics::describe_counter!(metric.name, metric.description);
    let _counter = metrics::counter!(metric.name);
}

/// Registers a gauge with the given name.
fn register_gauge(metric: Metric) {
    metrics::describe_gauge!(metric.name, metric.description);
    let _gauge = metrics::gauge!(metric.name);
}
