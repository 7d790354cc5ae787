use cloudfrog::download::DownloadState;
use cloudfrog::notify::{NotificationId, Notifier};
use cloudfrog::upload::UploadState;
use iocraft::prelude::*;
use tokio::sync::watch;

const BAR_WIDTH: usize = 40;
const LINK_LIFETIME: &str = "This link will expire in 7 days";

#[derive(Default, Props)]
pub struct MessageProps {
    pub message: String,
}

#[component]
pub fn SuccessMessage(props: &MessageProps) -> impl Into<AnyElement<'static>> {
    element! {
        View(flex_direction: FlexDirection::Row) {
            Text(color: Color::Green, content: "◆ ")
            Text(content: &props.message)
        }
    }
}

#[component]
pub fn ErrorMessage(props: &MessageProps) -> impl Into<AnyElement<'static>> {
    element! {
        View(flex_direction: FlexDirection::Row) {
            Text(color: Color::Red, content: "▲ ")
            Text(color: Color::Red, content: &props.message)
        }
    }
}

#[component]
pub fn LoadingMessage(props: &MessageProps) -> impl Into<AnyElement<'static>> {
    element! {
        View(flex_direction: FlexDirection::Row) {
            Text(color: Color::Cyan, content: "◇ ")
            Text(content: &props.message)
        }
    }
}

/// Prints notifications inline, above whatever is being rendered.
pub struct TerminalNotifier;

impl Notifier for TerminalNotifier {
    fn success(&self, message: &str) {
        element!(SuccessMessage(message: message.to_string())).print();
    }

    fn error(&self, message: &str) {
        element!(ErrorMessage(message: message.to_string())).print();
    }

    fn loading(&self, message: &str) -> NotificationId {
        element!(LoadingMessage(message: message.to_string())).print();
        NotificationId::next()
    }

    fn dismiss(&self, id: NotificationId) {
        tracing::debug!(id = id.0, "notification dismissed");
    }
}

#[derive(Default, Props)]
pub struct FileSummaryProps {
    pub name: String,
    pub size: u64,
}

#[component]
pub fn FileSummary(props: &FileSummaryProps) -> impl Into<AnyElement<'static>> {
    let megabytes = props.size as f64 / 1024.0 / 1024.0;
    element! {
        View(flex_direction: FlexDirection::Row) {
            Text(content: "┌ ")
            Text(weight: Weight::Bold, content: &props.name)
            Text(content: format!(" ({:.2} MB)", megabytes))
        }
    }
}

#[derive(Default, Props)]
pub struct ProgressBarProps {
    pub title: String,
    pub state: Option<watch::Receiver<UploadState>>,
}

#[component]
pub fn ProgressBar(props: &ProgressBarProps, mut hooks: Hooks) -> impl Into<AnyElement<'static>> {
    let mut percent = hooks.use_state(|| 0u8);
    let state = props.state.clone();

    hooks.use_future(async move {
        let Some(mut state) = state else {
            return;
        };
        while state.changed().await.is_ok() {
            let progress = state.borrow_and_update().progress;
            percent.set(progress);
        }
    });

    let percent = percent.get();
    let filled = usize::from(percent) * BAR_WIDTH / 100;

    element! {
        View(flex_direction: FlexDirection::Column) {
            View(flex_direction: FlexDirection::Row) {
                Text(color: Color::Blue, content: format!("│ {} ", props.title))
                Text(color: Color::Blue, weight: Weight::Bold, content: format!("{}%", percent))
            }
            Text(
                color: Color::Blue,
                content: format!("│ {}{}", "█".repeat(filled), "░".repeat(BAR_WIDTH - filled))
            )
        }
    }
}

#[derive(Default, Props)]
pub struct LinkCardProps {
    pub url: String,
    pub expires_at: Option<String>,
    pub copied: bool,
}

#[component]
pub fn LinkCard(props: &LinkCardProps) -> impl Into<AnyElement<'static>> {
    let expiry = match &props.expires_at {
        Some(expires_at) => format!("└ Expires at {}", expires_at),
        None => format!("└ {}", LINK_LIFETIME),
    };

    element! {
        View(flex_direction: FlexDirection::Column) {
            Text(color: Color::Green, weight: Weight::Bold, content: "│ File Uploaded Successfully!")
            Text(content: "│ Your file is now available at this link:")
            View(flex_direction: FlexDirection::Row) {
                Text(content: "│ ")
                View(background_color: Color::Blue) {
                    Text(color: Color::White, content: &props.url)
                }
            }
            #(props.copied.then(|| element! {
                Text(content: "│ (copied to clipboard)")
            }))
            Text(content: expiry)
        }
    }
}

#[derive(Default, Props)]
pub struct SpinnerProps {
    pub color: Option<Color>,
}

#[component]
pub fn Spinner(props: &SpinnerProps, mut hooks: Hooks) -> impl Into<AnyElement<'static>> {
    let mut frame = hooks.use_state(|| 0usize);

    hooks.use_future(async move {
        loop {
            tokio::time::sleep(tokio::time::Duration::from_millis(250)).await;
            frame.set((frame.get() + 1) % 4);
        }
    });

    let spinner_chars = ["◐", "◓", "◑", "◒"];
    let current_char = spinner_chars[*frame.read()];
    let color = props.color.unwrap_or(Color::Cyan);

    element! {
        Text(content: current_char, color: color)
    }
}

fn state_color(state: DownloadState) -> Color {
    match state {
        DownloadState::Loading => Color::Blue,
        DownloadState::Success => Color::Green,
        DownloadState::NotFound => Color::Red,
        DownloadState::Expired => Color::Yellow,
    }
}

#[derive(Default, Props)]
pub struct FollowDownloadProps {
    pub state: Option<watch::Receiver<DownloadState>>,
}

/// Live view while the download countdown and probe run.
#[component]
pub fn FollowDownload(
    props: &FollowDownloadProps,
    mut hooks: Hooks,
) -> impl Into<AnyElement<'static>> {
    let mut current = hooks.use_state(|| DownloadState::Loading);
    let state = props.state.clone();

    hooks.use_future(async move {
        let Some(mut state) = state else {
            return;
        };
        loop {
            current.set(*state.borrow_and_update());
            if state.changed().await.is_err() {
                break;
            }
        }
    });

    let current = current.get();
    let color = state_color(current);

    let icon = if current == DownloadState::Loading {
        element!(Spinner(color: color)).into_any()
    } else {
        element!(Text(color: color, content: "◆")).into_any()
    };

    element! {
        View(flex_direction: FlexDirection::Column) {
            View(flex_direction: FlexDirection::Row) {
                #(Some(icon))
                Text(weight: Weight::Bold, content: format!(" {}", current.title()))
            }
            Text(content: format!("│ {}", current.description()))
        }
    }
}

#[derive(Default, Props)]
pub struct DownloadStatusProps {
    pub state: Option<DownloadState>,
    pub url: String,
    pub saved_to: Option<String>,
}

#[component]
pub fn DownloadStatus(props: &DownloadStatusProps) -> impl Into<AnyElement<'static>> {
    let state = props.state.unwrap_or(DownloadState::Loading);
    let color = state_color(state);

    let footer = match state {
        DownloadState::Success => match &props.saved_to {
            Some(path) => format!("└ Saved to {}", path),
            None => format!("└ Download manually: {}", props.url),
        },
        DownloadState::Expired => {
            "└ Files on CloudFrog automatically expire after 7 days. Run `cloudfrog upload <FILE>` to share a new one.".to_string()
        }
        DownloadState::NotFound => "└ Run `cloudfrog upload <FILE>` to share a new file.".to_string(),
        DownloadState::Loading => format!("└ {}", props.url),
    };

    element! {
        View(flex_direction: FlexDirection::Column) {
            View(flex_direction: FlexDirection::Row) {
                Text(color: color, content: "┌ ◆ ")
                Text(weight: Weight::Bold, content: state.title())
            }
            Text(content: format!("│ {}", state.description()))
            Text(content: footer)
        }
    }
}

#[derive(Default, Props)]
pub struct InputPromptProps {
    pub prompt: String,
    pub default: Option<String>,
    pub description: Option<String>,
}

#[component]
pub fn InputPrompt(props: &InputPromptProps) -> impl Into<AnyElement<'static>> {
    let label = match &props.default {
        Some(default) => format!("{} [{}]", props.prompt, default),
        None => props.prompt.clone(),
    };

    element! {
        View(flex_direction: FlexDirection::Column) {
            Text(weight: Weight::Bold, content: label)
            #(props.description.as_ref().map(|description| element! {
                Text(content: description.clone())
            }))
        }
    }
}

#[component]
pub fn ConfigHeader() -> impl Into<AnyElement<'static>> {
    element! {
        View(flex_direction: FlexDirection::Column) {
            View(background_color: Color::Green) {
                Text(color: Color::White, content: " CloudFrog configuration ")
            }
            Text(content: "Press enter to keep the value shown in brackets.")
        }
    }
}
