mod server;
mod settings;

pub use server::ServerConfig;
pub use settings::{
    AvatarSettings, KeycloakSettings, PasswordSettings, ProofOfWorkSettings, Settings,
    SourceControlSettings, SshSettings, TraceSettings, UsageSettings,
};
