//! Document Renderer
//!
//! Pure functions turning typed pool, volume and domain records into libvirt
//! XML. All sizing, naming and MAC decisions are made before a record reaches
//! this module; rendering only substitutes and escapes.

use crate::config::{NetworkKind, VolumeFormat};
use crate::domain::ports::{
    DiskDevice, DomainSpec, FilePermissions, NetworkInterface, PoolDefinition, VolumeDefinition,
};
use std::borrow::Cow;

/// Escape text for use in XML content and attribute values
pub fn escape(text: &str) -> Cow<'_, str> {
    if !text.contains(['&', '<', '>', '"', '\'']) {
        return Cow::Borrowed(text);
    }

    let mut escaped = String::with_capacity(text.len() + 8);
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    Cow::Owned(escaped)
}

/// Spreadsheet-style letters for a 0-based device position: a..z, aa, ab, ...
pub fn device_letters(position: usize) -> String {
    let mut n = position + 1;
    let mut letters = Vec::new();
    while n > 0 {
        n -= 1;
        letters.push(b'a' + (n % 26) as u8);
        n /= 26;
    }
    letters.reverse();
    String::from_utf8_lossy(&letters).into_owned()
}

/// Guest device name of the disk at a 0-based position
pub fn disk_target(position: usize) -> String {
    format!("sd{}", device_letters(position))
}

fn permissions_xml(permissions: &FilePermissions, indent: &str) -> String {
    format!(
        "{indent}<permissions>\n\
         {indent}  <mode>{:04o}</mode>\n\
         {indent}  <owner>{}</owner>\n\
         {indent}  <group>{}</group>\n\
         {indent}</permissions>\n",
        permissions.mode,
        permissions.owner,
        permissions.group,
        indent = indent
    )
}

// =============================================================================
// Storage Documents
// =============================================================================

/// Directory-backed pool
pub fn pool_xml(definition: &PoolDefinition) -> String {
    let mut xml = String::from("<pool type='dir'>\n");
    xml.push_str(&format!("  <name>{}</name>\n", escape(&definition.name)));
    xml.push_str("  <target>\n");
    xml.push_str(&format!(
        "    <path>{}</path>\n",
        escape(&definition.path.to_string_lossy())
    ));
    xml.push_str(&permissions_xml(&definition.permissions, "    "));
    xml.push_str("  </target>\n");
    xml.push_str("</pool>\n");
    xml
}

/// Sparse file volume; capacity is a ceiling, allocation starts at zero
pub fn volume_xml(definition: &VolumeDefinition) -> String {
    let mut xml = String::from("<volume type='file'>\n");
    xml.push_str(&format!("  <name>{}</name>\n", escape(&definition.name)));
    xml.push_str(&format!(
        "  <capacity unit='GiB'>{}</capacity>\n",
        definition.capacity_gib
    ));
    xml.push_str("  <allocation unit='GiB'>0</allocation>\n");
    xml.push_str("  <target>\n");
    xml.push_str(&format!(
        "    <path>{}</path>\n",
        escape(&definition.path.to_string_lossy())
    ));
    xml.push_str(&format!("    <format type='{}'/>\n", definition.format));
    xml.push_str(&permissions_xml(&definition.permissions, "    "));
    if definition.format == VolumeFormat::Qcow2 {
        xml.push_str("    <compat>1.1</compat>\n");
        xml.push_str("    <features>\n      <lazy_refcounts/>\n    </features>\n");
    }
    xml.push_str("  </target>\n");
    xml.push_str("</volume>\n");
    xml
}

// =============================================================================
// Domain Document
// =============================================================================

fn disk_xml(disk: &DiskDevice) -> String {
    format!(
        "    <disk type=\"file\" device=\"disk\">\n\
         \x20     <driver name=\"qemu\" type=\"{format}\" cache=\"writeback\" io=\"threads\"/>\n\
         \x20     <source file=\"{path}\"/>\n\
         \x20     <target dev=\"{target}\" bus=\"scsi\"/>\n\
         \x20     <address type=\"drive\" controller=\"0\" bus=\"0\" target=\"0\" unit=\"{unit}\"/>\n\
         \x20   </disk>\n",
        format = disk.format,
        path = escape(&disk.path.to_string_lossy()),
        target = escape(&disk.target),
        unit = disk.unit,
    )
}

fn interface_xml(interface: &NetworkInterface) -> String {
    let (kind, attribute) = match interface.binding.kind {
        NetworkKind::Network => ("network", "network"),
        NetworkKind::Bridge => ("bridge", "bridge"),
    };
    format!(
        "    <interface type=\"{kind}\">\n\
         \x20     <mac address=\"{mac}\"/>\n\
         \x20     <source {attribute}=\"{name}\"/>\n\
         \x20     <model type=\"{model}\"/>\n\
         \x20   </interface>\n",
        kind = kind,
        mac = interface.mac,
        attribute = attribute,
        name = escape(&interface.binding.name),
        model = escape(&interface.model),
    )
}

/// Full domain definition; network boot comes first so MAAS can enlist the
/// node on first power-on
pub fn domain_xml(spec: &DomainSpec) -> String {
    let template = &spec.template;
    let mut xml = String::from("<domain type=\"kvm\">\n");
    xml.push_str(&format!("  <name>{}</name>\n", escape(&spec.name)));
    xml.push_str(&format!("  <memory unit=\"KiB\">{}</memory>\n", spec.memory_kib));
    xml.push_str(&format!(
        "  <currentMemory unit=\"KiB\">{}</currentMemory>\n",
        spec.memory_kib
    ));
    xml.push_str(&format!("  <vcpu placement=\"static\">{}</vcpu>\n", spec.vcpus));
    xml.push_str("  <os>\n");
    xml.push_str(&format!(
        "    <type arch=\"{}\" machine=\"{}\">hvm</type>\n",
        escape(&template.arch),
        escape(&template.machine)
    ));
    xml.push_str("    <boot dev=\"network\"/>\n");
    xml.push_str("    <boot dev=\"hd\"/>\n");
    xml.push_str("    <bootmenu enable=\"yes\"/>\n");
    xml.push_str("  </os>\n");
    xml.push_str("  <features>\n    <acpi/>\n    <apic/>\n    <vmport state=\"off\"/>\n  </features>\n");
    xml.push_str("  <cpu mode=\"host-passthrough\" check=\"none\">\n");
    xml.push_str(&format!(
        "    <topology sockets=\"1\" cores=\"{}\" threads=\"1\"/>\n",
        spec.vcpus
    ));
    xml.push_str("  </cpu>\n");
    xml.push_str("  <clock offset=\"utc\">\n");
    xml.push_str("    <timer name=\"rtc\" tickpolicy=\"catchup\"/>\n");
    xml.push_str("    <timer name=\"pit\" tickpolicy=\"delay\"/>\n");
    xml.push_str("    <timer name=\"hpet\" present=\"no\"/>\n");
    xml.push_str("  </clock>\n");
    xml.push_str("  <on_poweroff>destroy</on_poweroff>\n");
    xml.push_str("  <on_reboot>restart</on_reboot>\n");
    xml.push_str("  <on_crash>destroy</on_crash>\n");
    xml.push_str("  <devices>\n");
    xml.push_str(&format!(
        "    <emulator>{}</emulator>\n",
        escape(&template.emulator)
    ));
    for disk in &spec.disks {
        xml.push_str(&disk_xml(disk));
    }
    xml.push_str("    <controller type=\"scsi\" index=\"0\" model=\"virtio-scsi\"/>\n");
    for interface in &spec.interfaces {
        xml.push_str(&interface_xml(interface));
    }
    xml.push_str("    <serial type=\"pty\">\n      <target port=\"0\"/>\n    </serial>\n");
    xml.push_str("    <console type=\"pty\">\n      <target type=\"serial\" port=\"0\"/>\n    </console>\n");
    xml.push_str("    <graphics type=\"spice\" autoport=\"yes\">\n      <listen type=\"address\"/>\n    </graphics>\n");
    xml.push_str("    <video>\n      <model type=\"qxl\" heads=\"1\" primary=\"yes\"/>\n    </video>\n");
    xml.push_str("    <memballoon model=\"virtio\"/>\n");
    xml.push_str("  </devices>\n");
    xml.push_str("</domain>\n");
    xml
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DomainTemplate, NetworkBinding};
    use crate::fleet::MacAddress;
    use std::path::PathBuf;

    fn sample_spec() -> DomainSpec {
        DomainSpec {
            name: "maas-node-01".into(),
            memory_kib: 2048 * 1024,
            vcpus: 2,
            disks: (0..3)
                .map(|i| DiskDevice {
                    path: PathBuf::from(format!(
                        "/storage/images/maas/maas-node-01/maas-node-01-d{}.img",
                        i + 1
                    )),
                    format: VolumeFormat::Qcow2,
                    target: disk_target(i),
                    unit: i as u32,
                })
                .collect(),
            interfaces: vec![NetworkInterface {
                mac: MacAddress::new([0x52, 0x54, 0x00, 0x00, 0x00, 0x01]),
                binding: NetworkBinding::network("maas"),
                model: "virtio".into(),
            }],
            template: DomainTemplate::default(),
        }
    }

    #[test]
    fn test_device_letters() {
        assert_eq!(device_letters(0), "a");
        assert_eq!(device_letters(2), "c");
        assert_eq!(device_letters(25), "z");
        assert_eq!(device_letters(26), "aa");
        assert_eq!(device_letters(27), "ab");
        assert_eq!(device_letters(701), "zz");
        assert_eq!(device_letters(702), "aaa");
        assert_eq!(disk_target(1), "sdb");
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape("plain"), "plain");
        assert!(matches!(escape("plain"), Cow::Borrowed(_)));
        assert_eq!(escape("a<b & 'c'"), "a&lt;b &amp; &apos;c&apos;");
    }

    #[test]
    fn test_pool_xml() {
        let xml = pool_xml(&PoolDefinition {
            name: "maas-node-01".into(),
            path: PathBuf::from("/storage/images/maas/maas-node-01"),
            permissions: FilePermissions::POOL_DIRECTORY,
        });
        assert!(xml.starts_with("<pool type='dir'>"));
        assert!(xml.contains("<name>maas-node-01</name>"));
        assert!(xml.contains("<path>/storage/images/maas/maas-node-01</path>"));
        assert!(xml.contains("<mode>0755</mode>"));
    }

    #[test]
    fn test_volume_xml_is_sparse() {
        let mut definition = VolumeDefinition {
            name: "maas-node-01-d2.img".into(),
            path: PathBuf::from("/storage/images/maas/maas-node-01/maas-node-01-d2.img"),
            capacity_gib: 100,
            format: VolumeFormat::Qcow2,
            permissions: FilePermissions::VOLUME_FILE,
        };
        let xml = volume_xml(&definition);
        assert!(xml.contains("<capacity unit='GiB'>100</capacity>"));
        assert!(xml.contains("<allocation unit='GiB'>0</allocation>"));
        assert!(xml.contains("<format type='qcow2'/>"));
        assert!(xml.contains("<lazy_refcounts/>"));
        assert!(xml.contains("<mode>0644</mode>"));

        definition.format = VolumeFormat::Raw;
        let xml = volume_xml(&definition);
        assert!(xml.contains("<format type='raw'/>"));
        assert!(!xml.contains("compat"));
    }

    #[test]
    fn test_domain_xml_binds_every_field() {
        let xml = domain_xml(&sample_spec());
        assert!(xml.contains("<name>maas-node-01</name>"));
        assert!(xml.contains("<memory unit=\"KiB\">2097152</memory>"));
        assert!(xml.contains("<vcpu placement=\"static\">2</vcpu>"));
        assert!(xml.contains("cores=\"2\""));
        assert!(xml.contains("<mac address=\"52:54:00:00:00:01\"/>"));
        assert!(xml.contains("<source network=\"maas\"/>"));
        assert!(xml.contains("<model type=\"virtio\"/>"));
        assert!(xml.contains("<emulator>/usr/bin/qemu-system-x86_64</emulator>"));

        // disks keep device order
        let sda = xml.find("maas-node-01-d1.img").unwrap();
        let sdb = xml.find("maas-node-01-d2.img").unwrap();
        let sdc = xml.find("maas-node-01-d3.img").unwrap();
        assert!(sda < sdb && sdb < sdc);
        assert!(xml.contains("<target dev=\"sdc\" bus=\"scsi\"/>"));
        assert!(xml.contains("unit=\"2\""));

        // network boot before disk
        assert!(xml.find("boot dev=\"network\"").unwrap() < xml.find("boot dev=\"hd\"").unwrap());
    }

    #[test]
    fn test_domain_xml_bridge_binding() {
        let mut spec = sample_spec();
        spec.interfaces[0].binding = NetworkBinding::bridge("br-maas");
        let xml = domain_xml(&spec);
        assert!(xml.contains("<interface type=\"bridge\">"));
        assert!(xml.contains("<source bridge=\"br-maas\"/>"));
    }
}
