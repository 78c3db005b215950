//! End-to-end adaptive dispatch: synthesized dispatchers, key cascades,
//! the protocol key, discovered class-level adaptives, and slot poisoning.

use std::sync::Arc;

use spindle_core::INTERNAL_DIRECTORY;
use spindle_sdk::extension_instance;
use spindle_sdk::prelude::*;

fn unwrap_err<T, E>(result: Result<T, E>) -> E {
    match result {
        Ok(_) => panic!("expected Err, got Ok"),
        Err(e) => e,
    }
}

// ---------------------------------------------------------------------------
// Transporter: two adaptive keys with the SPI default as final fallback.
// ---------------------------------------------------------------------------

trait Transporter: Send + Sync {
    fn connect(&self, url: &Url, target: &str) -> Result<String, ExtensionError>;
    fn close(&self) -> Result<(), ExtensionError>;
}

struct TransporterPoint;
impl ExtensionPoint for TransporterPoint {
    type Contract = dyn Transporter;
    const NAME: &'static str = "spindle.e2e.Transporter";
    const DEFAULT: &'static str = "netty";

    fn adaptive_profile() -> Option<AdaptiveProfile<Self>> {
        Some(
            AdaptiveProfile::new(|binding| Arc::new(TransporterAdaptive { binding })).with_method(
                AdaptiveMethod::new("connect")
                    .key("client")
                    .key("transporter")
                    .url_parameter(0),
            ),
        )
    }
}

struct TransporterAdaptive {
    binding: AdaptiveBinding<TransporterPoint>,
}

impl Transporter for TransporterAdaptive {
    fn connect(&self, url: &Url, target: &str) -> Result<String, ExtensionError> {
        self.binding
            .extension("connect", url, None)?
            .connect(url, target)
    }

    fn close(&self) -> Result<(), ExtensionError> {
        Err(self.binding.unsupported("close"))
    }
}

macro_rules! transporter {
    ($ty:ident, $label:literal) => {
        struct $ty;
        impl Transporter for $ty {
            fn connect(&self, _url: &Url, target: &str) -> Result<String, ExtensionError> {
                Ok(format!(concat!($label, "->{}"), target))
            }
            fn close(&self) -> Result<(), ExtensionError> {
                Ok(())
            }
        }
        extension_instance!($ty: TransporterPoint);
    };
}

transporter!(NettyTransporter, "netty");
transporter!(MinaTransporter, "mina");
transporter!(GrizzlyTransporter, "grizzly");

struct ManualTransporter;
impl Transporter for ManualTransporter {
    fn connect(&self, _url: &Url, _target: &str) -> Result<String, ExtensionError> {
        Ok("manual".to_string())
    }
    fn close(&self) -> Result<(), ExtensionError> {
        Ok(())
    }
}
extension_instance!(ManualTransporter: TransporterPoint);

fn transporter_classes() -> Arc<ClassPath> {
    let path = Arc::new(ClassPath::new());
    path.install(PlainClass::new("spindle.e2e.NettyTransporter", || NettyTransporter).into_class());
    path.install(PlainClass::new("spindle.e2e.MinaTransporter", || MinaTransporter).into_class());
    path.install(
        PlainClass::new("spindle.e2e.GrizzlyTransporter", || GrizzlyTransporter).into_class(),
    );
    path.install(
        PlainClass::new("spindle.e2e.ManualTransporter", || ManualTransporter)
            .adaptive_marker()
            .into_class(),
    );
    path
}

const TRANSPORTER_MANIFEST: &str = "\
netty=spindle.e2e.NettyTransporter
mina=spindle.e2e.MinaTransporter
grizzly=spindle.e2e.GrizzlyTransporter
";

fn transporter_domain(manifest: &str) -> Arc<ExtensionDomain> {
    ExtensionDomain::builder()
        .class_resolver(transporter_classes())
        .embedded_manifest(INTERNAL_DIRECTORY, TransporterPoint::NAME, manifest)
        .build()
}

#[test]
fn test_synthesized_dispatch_follows_the_key_cascade() {
    let domain = transporter_domain(TRANSPORTER_MANIFEST);
    let loader = domain.loader::<TransporterPoint>().unwrap();
    let adaptive = loader.adaptive().unwrap();

    let url = Url::new().with_parameter("client", "mina");
    assert_eq!(adaptive.connect(&url, "a").unwrap(), "mina->a");

    let url = Url::new().with_parameter("transporter", "grizzly");
    assert_eq!(adaptive.connect(&url, "b").unwrap(), "grizzly->b");

    let url = Url::new()
        .with_parameter("client", "mina")
        .with_parameter("transporter", "grizzly");
    assert_eq!(adaptive.connect(&url, "c").unwrap(), "mina->c");

    assert_eq!(adaptive.connect(&Url::new(), "d").unwrap(), "netty->d");
}

#[test]
fn test_adaptive_is_cached() {
    let domain = transporter_domain(TRANSPORTER_MANIFEST);
    let loader = domain.loader::<TransporterPoint>().unwrap();
    let first = loader.adaptive().unwrap();
    let second = loader.adaptive().unwrap();
    assert!(Arc::ptr_eq(&first, &second));
}

#[test]
fn test_unknown_selection_surfaces_from_dispatch() {
    let domain = transporter_domain(TRANSPORTER_MANIFEST);
    let adaptive = domain.loader::<TransporterPoint>().unwrap().adaptive().unwrap();

    let url = Url::new().with_parameter("client", "carrier-pigeon");
    assert!(matches!(
        adaptive.connect(&url, "x"),
        Err(ExtensionError::Unknown { .. })
    ));
}

#[test]
fn test_non_adaptive_method_raises() {
    let domain = transporter_domain(TRANSPORTER_MANIFEST);
    let adaptive = domain.loader::<TransporterPoint>().unwrap().adaptive().unwrap();
    assert!(matches!(
        adaptive.close(),
        Err(ExtensionError::NotAdaptive { .. })
    ));
}

#[test]
fn test_discovered_class_level_adaptive_wins() {
    let manifest = "\
netty=spindle.e2e.NettyTransporter
manual=spindle.e2e.ManualTransporter
";
    let domain = transporter_domain(manifest);
    let adaptive = domain.loader::<TransporterPoint>().unwrap().adaptive().unwrap();
    assert_eq!(adaptive.connect(&Url::new(), "x").unwrap(), "manual");
}

#[test]
fn test_second_adaptive_class_is_fatal() {
    let path = Arc::new(ClassPath::new());
    path.install(
        PlainClass::new("spindle.e2e.FirstAdaptive", || ManualTransporter)
            .adaptive_marker()
            .into_class(),
    );
    path.install(
        PlainClass::new("spindle.e2e.SecondAdaptive", || ManualTransporter)
            .adaptive_marker()
            .into_class(),
    );
    let domain = ExtensionDomain::builder()
        .class_resolver(path)
        .embedded_manifest(
            INTERNAL_DIRECTORY,
            TransporterPoint::NAME,
            "one=spindle.e2e.FirstAdaptive\ntwo=spindle.e2e.SecondAdaptive\n",
        )
        .build();
    let loader = domain.loader::<TransporterPoint>().unwrap();
    assert!(matches!(
        loader.supported_names(),
        Err(ExtensionError::DuplicateAdaptive { .. })
    ));
}

// ---------------------------------------------------------------------------
// Protocol key: resolved against url.protocol() with the default fallback.
// ---------------------------------------------------------------------------

trait Exporter: Send + Sync {
    fn export(&self, url: &Url) -> Result<&'static str, ExtensionError>;
}

struct ExporterPoint;
impl ExtensionPoint for ExporterPoint {
    type Contract = dyn Exporter;
    const NAME: &'static str = "spindle.e2e.Exporter";
    const DEFAULT: &'static str = "local";

    fn adaptive_profile() -> Option<AdaptiveProfile<Self>> {
        Some(
            AdaptiveProfile::new(|binding| Arc::new(ExporterAdaptive { binding }))
                .with_method(AdaptiveMethod::new("export").key("protocol").url_parameter(0)),
        )
    }
}

struct ExporterAdaptive {
    binding: AdaptiveBinding<ExporterPoint>,
}
impl Exporter for ExporterAdaptive {
    fn export(&self, url: &Url) -> Result<&'static str, ExtensionError> {
        self.binding.extension("export", url, None)?.export(url)
    }
}

struct LocalExporter;
impl Exporter for LocalExporter {
    fn export(&self, _url: &Url) -> Result<&'static str, ExtensionError> {
        Ok("local")
    }
}
extension_instance!(LocalExporter: ExporterPoint);

struct RmiExporter;
impl Exporter for RmiExporter {
    fn export(&self, _url: &Url) -> Result<&'static str, ExtensionError> {
        Ok("rmi")
    }
}
extension_instance!(RmiExporter: ExporterPoint);

#[test]
fn test_protocol_key_selects_by_url_protocol() {
    let path = Arc::new(ClassPath::new());
    path.install(PlainClass::new("spindle.e2e.LocalExporter", || LocalExporter).into_class());
    path.install(PlainClass::new("spindle.e2e.RmiExporter", || RmiExporter).into_class());
    let domain = ExtensionDomain::builder()
        .class_resolver(path)
        .embedded_manifest(
            INTERNAL_DIRECTORY,
            ExporterPoint::NAME,
            "local=spindle.e2e.LocalExporter\nrmi=spindle.e2e.RmiExporter\n",
        )
        .build();
    let adaptive = domain.loader::<ExporterPoint>().unwrap().adaptive().unwrap();

    let url = Url::new().with_protocol("rmi");
    assert_eq!(adaptive.export(&url).unwrap(), "rmi");
    assert_eq!(adaptive.export(&Url::new()).unwrap(), "local");
}

// ---------------------------------------------------------------------------
// Url reached through a getter on a request argument, with the null check
// the dispatcher performs before resolving.
// ---------------------------------------------------------------------------

struct Request {
    url: Option<Url>,
}

impl Request {
    fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }
}

trait Sender: Send + Sync {
    fn send(&self, request: &Request) -> Result<&'static str, ExtensionError>;
}

struct SenderPoint;
impl ExtensionPoint for SenderPoint {
    type Contract = dyn Sender;
    const NAME: &'static str = "spindle.e2e.Sender";
    const DEFAULT: &'static str = "tcp";

    fn adaptive_profile() -> Option<AdaptiveProfile<Self>> {
        Some(
            AdaptiveProfile::new(|binding| Arc::new(SenderAdaptive { binding })).with_method(
                AdaptiveMethod::new("send")
                    .key("sender")
                    .url_getter(0, "url"),
            ),
        )
    }
}

struct SenderAdaptive {
    binding: AdaptiveBinding<SenderPoint>,
}

impl Sender for SenderAdaptive {
    fn send(&self, request: &Request) -> Result<&'static str, ExtensionError> {
        let url = request
            .url()
            .ok_or_else(|| self.binding.missing_url("send"))?;
        self.binding.extension("send", url, None)?.send(request)
    }
}

struct TcpSender;
impl Sender for TcpSender {
    fn send(&self, _request: &Request) -> Result<&'static str, ExtensionError> {
        Ok("tcp")
    }
}
extension_instance!(TcpSender: SenderPoint);

struct UdpSender;
impl Sender for UdpSender {
    fn send(&self, _request: &Request) -> Result<&'static str, ExtensionError> {
        Ok("udp")
    }
}
extension_instance!(UdpSender: SenderPoint);

#[test]
fn test_url_through_getter_with_null_check() {
    let path = Arc::new(ClassPath::new());
    path.install(PlainClass::new("spindle.e2e.TcpSender", || TcpSender).into_class());
    path.install(PlainClass::new("spindle.e2e.UdpSender", || UdpSender).into_class());
    let domain = ExtensionDomain::builder()
        .class_resolver(path)
        .embedded_manifest(
            INTERNAL_DIRECTORY,
            SenderPoint::NAME,
            "tcp=spindle.e2e.TcpSender\nudp=spindle.e2e.UdpSender\n",
        )
        .build();
    let adaptive = domain.loader::<SenderPoint>().unwrap().adaptive().unwrap();

    let request = Request {
        url: Some(Url::new().with_parameter("sender", "udp")),
    };
    assert_eq!(adaptive.send(&request).unwrap(), "udp");

    let request = Request {
        url: Some(Url::new()),
    };
    assert_eq!(adaptive.send(&request).unwrap(), "tcp");

    let request = Request { url: None };
    assert!(matches!(
        adaptive.send(&request),
        Err(ExtensionError::MissingUrl { .. })
    ));
}

// ---------------------------------------------------------------------------
// Failure modes: missing url source and missing adaptive methods poison
// the slot with a sticky error.
// ---------------------------------------------------------------------------

trait Pinger: Send + Sync {
    fn ping(&self) -> Result<String, ExtensionError>;
}

struct NoUrlPoint;
impl ExtensionPoint for NoUrlPoint {
    type Contract = dyn Pinger;
    const NAME: &'static str = "spindle.e2e.NoUrlPinger";

    fn adaptive_profile() -> Option<AdaptiveProfile<Self>> {
        // `ping` declares no url source, which synthesis must reject.
        Some(
            AdaptiveProfile::new(|_binding| unreachable!("synthesis must fail first"))
                .with_method(AdaptiveMethod::new("ping")),
        )
    }
}

struct ProfilelessPoint;
impl ExtensionPoint for ProfilelessPoint {
    type Contract = dyn Pinger;
    const NAME: &'static str = "spindle.e2e.ProfilelessPinger";
}

#[test]
fn test_missing_url_source_poisons_the_slot() {
    let domain = ExtensionDomain::new();
    let loader = domain.loader::<NoUrlPoint>().unwrap();

    let first = unwrap_err(loader.adaptive());
    assert!(first.to_string().contains("no url parameter"));

    let second = unwrap_err(loader.adaptive());
    assert!(matches!(second, ExtensionError::Adaptive { .. }));
    assert!(second.to_string().contains("no url parameter"));
}

#[test]
fn test_point_without_adaptive_methods_cannot_synthesize() {
    let domain = ExtensionDomain::new();
    let loader = domain.loader::<ProfilelessPoint>().unwrap();
    let err = unwrap_err(loader.adaptive());
    assert!(err.to_string().contains("no adaptive method"));
}
