/// Configuration template written by `flexcheck generate-config`.
pub const CONFIG_TEMPLATE: &str = r#"# flexcheck configuration
#
# Every key can be overridden from the environment, e.g.
#   FLEXCHECK_TIMEOUTS__CLUSTER_MOVE_MS=600000

[cluster]
num_masters = 3
# Data-plane nodes before expansion; the scenario doubles then halves this
num_tablet_servers = 3
# Failure detector timeout on the masters; the scenario sleeps twice this
heartbeat_timeout_ms = 5000
startup_timeout_ms = 50000

[workload]
name = "CassandraStockTicker"
verbose = true
# Ops required between significant events
ops_increment = 10000
join_timeout_ms = 30000

[timeouts]
poll_interval_ms = 1000
wait_for_ops_ms = 30000
load_balance_ms = 30000
cluster_move_ms = 300000
# Retry budget for one-off metrics checks while an endpoint is unreachable
metrics_check_ms = 30000

[metrics]
op_count_metric = "handler_latency_yb_cqlserver_SQLProcessor_ExecuteRequest"
live_nodes_metric = "num_tablet_servers_live"
request_timeout_ms = 5000
"#;
