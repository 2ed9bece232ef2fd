use super::*;

const SAMPLE: &str = r#"
[core]
log_level = "debug"
max_tools = 10
message_queue_size = 256
control_port = 9300

[tool.gen]
command = "printf 'PING|gen|p1\n'"
description = "ping generator"
autostart = true
restart_policy = "always"

[tool.echo]
command = "cat"
subscribe_to = "PING, PONG"
restart_on_crash = true
max_restarts = 2
max_queue_size = 3
queue_policy = "drop_newest"
"#;

#[test]
fn sample_config_parses_with_defaults_filled() {
    let config: KernelConfig = toml::from_str(SAMPLE).unwrap();
    config.validate().unwrap();

    assert_eq!(config.core.log_level, LogLevel::Debug);
    assert_eq!(config.core.max_tools, 10);
    assert_eq!(config.core.message_queue_size, 256);
    assert_eq!(config.core.control_port, Some(9300));
    assert!(!config.core.enable_debug);

    let gen_tool = &config.tool["gen"];
    assert!(gen_tool.autostart);
    assert_eq!(gen_tool.restart_policy, RestartPolicy::Always);
    assert_eq!(gen_tool.max_restarts, 3);
    assert_eq!(gen_tool.max_queue_size, 100);
    assert_eq!(gen_tool.queue_policy, OverflowPolicy::DropOldest);
    assert!(gen_tool.subscriptions().is_empty());

    let echo = &config.tool["echo"];
    assert_eq!(echo.subscriptions(), vec!["PING", "PONG"]);
    assert!(echo.restart_on_crash);
    assert_eq!(echo.max_restarts, 2);
    assert_eq!(echo.queue_policy, OverflowPolicy::DropNewest);
}

#[test]
fn empty_config_is_valid() {
    let config: KernelConfig = toml::from_str("").unwrap();
    config.validate().unwrap();
    assert_eq!(config.core.max_tools, 100);
    assert_eq!(config.core.message_queue_size, 1024);
    assert!(config.tool.is_empty());
}

#[test]
fn load_round_trips_through_a_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("herd.toml");
    std::fs::write(&path, SAMPLE).unwrap();
    let config = KernelConfig::load(&path).unwrap();
    assert_eq!(config.tool.len(), 2);
}

#[test]
fn load_missing_file_fails_with_path_in_context() {
    let err = KernelConfig::load(Path::new("/nonexistent/herd.toml")).unwrap_err();
    assert!(format!("{err:#}").contains("/nonexistent/herd.toml"));
}

#[test]
fn tools_iterate_in_name_order() {
    let config: KernelConfig = toml::from_str(
        r#"
[tool.c]
command = "true"
[tool.a]
command = "true"
[tool.b]
command = "true"
"#,
    )
    .unwrap();
    let names: Vec<&str> = config.tool.keys().map(String::as_str).collect();
    assert_eq!(names, vec!["a", "b", "c"]);
}

#[test]
fn validate_rejects_empty_command() {
    let config: KernelConfig = toml::from_str("[tool.x]\ncommand = \"  \"").unwrap();
    assert!(config.validate().is_err());
}

#[test]
fn validate_rejects_zero_queue_size() {
    let config: KernelConfig =
        toml::from_str("[tool.x]\ncommand = \"true\"\nmax_queue_size = 0").unwrap();
    assert!(config.validate().is_err());
}

#[test]
fn validate_rejects_too_many_tools() {
    let config: KernelConfig = toml::from_str(
        r#"
[core]
max_tools = 1
[tool.a]
command = "true"
[tool.b]
command = "true"
"#,
    )
    .unwrap();
    assert!(config.validate().is_err());
}

#[test]
fn validate_rejects_pipe_in_tool_name() {
    let config: KernelConfig = toml::from_str("[tool.\"a|b\"]\ncommand = \"true\"").unwrap();
    assert!(config.validate().is_err());
}

#[test]
fn bad_queue_policy_fails_to_parse() {
    let result: Result<KernelConfig, _> =
        toml::from_str("[tool.x]\ncommand = \"true\"\nqueue_policy = \"drop_everything\"");
    assert!(result.is_err());
}

#[test]
fn subscriptions_are_trimmed_of_quotes_and_whitespace() {
    let spec = ToolSpec {
        command: "true".into(),
        description: None,
        autostart: false,
        restart_on_crash: false,
        max_restarts: 3,
        restart_policy: RestartPolicy::Never,
        subscribe_to: Some(" PING , \"PONG\" , '*' ,, ".into()),
        max_queue_size: 100,
        queue_policy: OverflowPolicy::DropOldest,
    };
    assert_eq!(spec.subscriptions(), vec!["PING", "PONG", "*"]);
}

#[test]
fn log_level_parses_case_insensitively() {
    assert_eq!("WARN".parse(), Ok(LogLevel::Warn));
    assert_eq!("fatal".parse(), Ok(LogLevel::Fatal));
    assert_eq!(LogLevel::Fatal.as_filter_str(), "error");
}
