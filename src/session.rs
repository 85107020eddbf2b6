use std::io;

use colored::Colorize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, Lines};

use crate::apis::inference::{GenerationRequest, SubmissionError};
use crate::models::ModelDescriptor;
use crate::utilities::confirmation::requires_confirmation;
use crate::utilities::credential::Credential;
use crate::utilities::generator::{GenerateError, Generator, Progress, Submit};

const HELP: &str = "\
type a description to generate an image, or one of:
  :models       list models
  :model <n>    select model <n>
  :key          edit API key
  :logout       forget API key
  :quit         leave
start a description with :: to begin it with a single :";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Exit {
    Quit,
    Declined,
    LoggedOut,
    EndOfInput,
}

#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Prompt(&'a str),
    Models,
    SelectModel(Option<usize>),
    EditKey,
    Logout,
    Help,
    Quit,
    Unknown(&'a str),
}

impl<'a> Command<'a> {
    fn parse(line: &'a str) -> Self {
        let line = line.trim();
        let Some(command) = line.strip_prefix(':') else {
            return Self::Prompt(line);
        };
        if command.starts_with(':') {
            return Self::Prompt(command);
        }

        let (name, argument) = command.split_once(' ').unwrap_or((command, ""));
        match name {
            "models" => Self::Models,
            "model" | "m" => Self::SelectModel(argument.trim().parse().ok()),
            "key" => Self::EditKey,
            "logout" => Self::Logout,
            "help" | "h" => Self::Help,
            "quit" | "q" => Self::Quit,
            _ => Self::Unknown(name),
        }
    }
}

/// Terminal rendition of the generator form.
pub struct Session<T, R, W> {
    generator: Generator<T>,
    credential: Credential,
    decline_url: String,
    model: &'static ModelDescriptor,
    input: Lines<R>,
    output: W,
}

impl<T, R, W> Session<T, R, W>
where
    T: Submit,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(
        generator: Generator<T>,
        credential: Credential,
        decline_url: String,
        input: R,
        output: W,
    ) -> Self {
        let model = generator.catalog().default_model();
        Self { generator, credential, decline_url, model, input: input.lines(), output }
    }

    pub async fn run(&mut self) -> io::Result<Exit> {
        self.write(&format!(
            "{}\n{}\n\n",
            "AI Image Generator".bold(),
            "All of the models. None of the subscriptions.".bright_black()
        ))
        .await?;
        self.list_models().await?;
        self.write(&format!("{}\n", "type :help for commands".bright_black())).await?;

        loop {
            if self.credential.get().is_none() && !self.on_edit_credential().await? {
                return Ok(Exit::EndOfInput);
            }

            self.write(&format!("\n{} {}\n", "model:".bold(), self.model.display_name)).await?;
            let Some(line) = self.read_line("Image description").await? else {
                return Ok(Exit::EndOfInput);
            };

            match Command::parse(&line) {
                Command::Prompt("") => {}
                Command::Prompt(prompt) => {
                    if let Some(exit) = self.generate(prompt.to_owned()).await? {
                        return Ok(exit);
                    }
                }
                Command::Models => self.list_models().await?,
                Command::SelectModel(index) => self.select_model(index).await?,
                Command::EditKey => {
                    if !self.on_edit_credential().await? {
                        return Ok(Exit::EndOfInput);
                    }
                }
                Command::Logout => {
                    if let Some(exit) = self.on_logout() {
                        return Ok(exit);
                    }
                }
                Command::Help => self.write(&format!("{HELP}\n")).await?,
                Command::Quit => return Ok(Exit::Quit),
                Command::Unknown(name) => {
                    self.write(&format!("unknown command :{name}, try :help\n")).await?;
                }
            }
        }
    }

    async fn generate(&mut self, prompt: String) -> io::Result<Option<Exit>> {
        let negative_prompt = if self.model.supports_negative_prompt {
            let Some(line) = self.read_line("Negative prompt (optional)").await? else {
                return Ok(Some(Exit::EndOfInput));
            };
            Some(line.trim().to_owned()).filter(|line| !line.is_empty())
        } else {
            None
        };

        let Some(request) = GenerationRequest::new(prompt, negative_prompt, self.model.id) else {
            self.write("please describe the image\n").await?;
            return Ok(None);
        };

        let Some(credential) = self.credential.get().map(ToOwned::to_owned) else {
            self.write("set an API key first (:key)\n").await?;
            return Ok(None);
        };

        if !requires_confirmation(self.model) {
            self.write(&format!("{}\n", "Generating…".bright_black())).await?;
        }

        let result = match self.generator.submit(request, &credential).await {
            Ok(Progress::AwaitingConfirmation) => {
                if self.ask_confirmation().await? {
                    self.write(&format!("{}\n", "Generating…".bright_black())).await?;
                    self.generator.confirm(&credential).await
                } else {
                    if let Err(err) = self.generator.decline() {
                        log::warn!("{err}");
                    }
                    self.on_decline().await?;
                    return Ok(Some(Exit::Declined));
                }
            }
            result => result,
        };

        match result {
            Ok(_) => self.show_image().await?,
            Err(err) => self.alert(&error_message(&err)).await?,
        }

        Ok(None)
    }

    async fn ask_confirmation(&mut self) -> io::Result<bool> {
        self.write(&format!(
            "{}\n",
            format!("{} can generate NSFW content.", self.model.display_name).bright_yellow()
        ))
        .await?;

        let answer = self.read_line("Are you 18 or older and want to continue? [y/N]").await?;
        Ok(answer.is_some_and(|answer| matches!(answer.trim(), "y" | "Y" | "yes" | "Yes")))
    }

    async fn show_image(&mut self) -> io::Result<()> {
        let (size, content_type) = self.generator.image().map_or((0, None), |image| {
            (image.bytes().len(), image.content_type())
        });
        let mut text = match self.generator.image_path() {
            Some(path) => format!(
                "Your generated image: {} ({size} bytes, {})\n",
                path.display(),
                content_type.unwrap_or("unknown type")
            ),
            None => "Your image was generated but could not be saved, see the log.\n".into(),
        };

        if let Some(quota) = self.generator.quota() {
            text.push_str(&format!(
                "{}\n",
                format!("{}/{} requests used", quota.state().request_count, quota.limit())
                    .bright_black()
            ));
        }

        self.write(&text).await
    }

    /// Shows the message and waits for Enter.
    async fn alert(&mut self, message: &str) -> io::Result<()> {
        self.write(&format!("{}\n", message.bright_red())).await?;
        self.read_line("press Enter to continue").await?;
        Ok(())
    }

    async fn list_models(&mut self) -> io::Result<()> {
        let mut text = String::new();
        for (i, model) in self.generator.catalog().models().iter().enumerate() {
            let marker = if model.id == self.model.id { '*' } else { ' ' };
            let mut line = format!("{marker} {}. {}", i + 1, model.display_name);
            if model.supports_negative_prompt {
                line.push_str(" (negative prompt)");
            }
            if model.nsfw {
                line.push_str(" (NSFW)");
            }
            text.push_str(&line);
            text.push('\n');
        }
        self.write(&text).await
    }

    async fn select_model(&mut self, index: Option<usize>) -> io::Result<()> {
        let models = self.generator.catalog().models();
        match index.and_then(|index| index.checked_sub(1)).and_then(|index| models.get(index)) {
            Some(model) => {
                log::debug!("selected {}", model.id);
                self.model = model;
                Ok(())
            }
            None => self.write(&format!("pick a model between 1 and {}\n", models.len())).await,
        }
    }

    /// Returns false when input ends before a key is entered.
    async fn on_edit_credential(&mut self) -> io::Result<bool> {
        if !self.credential.is_editable() {
            self.write("the API key is set by the deployment\n").await?;
            return Ok(true);
        }

        loop {
            let Some(line) = self.read_line("Hugging Face API key").await? else {
                return Ok(false);
            };
            if self.credential.set(&line) {
                log::info!("API key updated");
                return Ok(true);
            }
            self.write("the API key can't be empty\n").await?;
        }
    }

    fn on_logout(&mut self) -> Option<Exit> {
        self.credential.forget();
        log::info!("logged out");
        (!self.credential.is_editable()).then_some(Exit::LoggedOut)
    }

    async fn on_decline(&mut self) -> io::Result<()> {
        log::info!("leaving for {}", self.decline_url);
        self.write(&format!("Leaving, see you at {}\n", self.decline_url)).await
    }

    async fn read_line(&mut self, label: &str) -> io::Result<Option<String>> {
        self.write(&format!("{}: ", label.bold())).await?;
        self.input.next_line().await
    }

    async fn write(&mut self, text: &str) -> io::Result<()> {
        self.output.write_all(text.as_bytes()).await?;
        self.output.flush().await
    }
}

fn error_message(err: &GenerateError) -> String {
    match err {
        GenerateError::Submission(SubmissionError::RateLimitExceeded { .. }) => {
            format!("{err}.")
        }
        GenerateError::Submission(err) => {
            format!("Error generating image: {err}. Please check your API key and try again.")
        }
        GenerateError::Flow(err) => format!("{err}."),
    }
}
