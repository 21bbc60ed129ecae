use std::fmt::Display;

use minijinja::{context, Environment, ErrorKind};
use minijinja_contrib::pycompat;
use vision_chat::ConversationEntry;

#[cfg(test)]
use pretty_assertions::assert_eq;

/// The chat template GLM-Edge-V models ship with. Every image placeholder expands to
/// `image_token_count` image tokens.
pub const DEFAULT_GLM_EDGE_TEMPLATE: &str = "{% for item in messages %}{% if item['role'] == 'system' %}{{ '<|system|>\\n' }}{% for content in item['content'] %}{% if content['type'] == 'text' %}{{ content['text'] }}{% endif %}{% endfor %}{{ '\\n' }}{% elif item['role'] == 'user' %}{{ '<|user|>\\n' }}{% for content in item['content'] %}{% if content['type'] == 'image' %}{% for _ in range(image_token_count) %}{{ '<|begin_of_image|>' }}{% endfor %}{% elif content['type'] == 'text' %}{{ content['text'] }}{% endif %}{% endfor %}{{ '\\n' }}{% elif item['role'] == 'assistant' %}{{ '<|assistant|>\\n' }}{% for content in item['content'] %}{% if content['type'] == 'text' %}{{ content['text'] }}{% endif %}{% endfor %}{{ '\\n' }}{% endif %}{% endfor %}{% if add_generation_prompt %}{{ '<|assistant|>\\n' }}{% endif %}";

/// The number of image tokens a GLM-Edge-V image placeholder expands to.
pub const DEFAULT_IMAGE_TOKEN_COUNT: usize = 578;

/// A Hugging Face style chat template.
pub(crate) struct HuggingFaceChatTemplate {
    environment: Environment<'static>,
}

impl HuggingFaceChatTemplate {
    pub(crate) fn create(chat_template: impl Display) -> Result<Self, minijinja::Error> {
        let chat_template = chat_template.to_string();
        let mut environment = Environment::new();

        // templates are written against jinja2 with these settings
        environment.set_trim_blocks(true);
        environment.set_lstrip_blocks(true);

        // enable python compatibility methods because most models are tested with python
        environment.set_unknown_method_callback(pycompat::unknown_method_callback);

        // add the raise_exception function from huggingface templates to the environment
        let raise_exception = |err_text: String| -> Result<String, minijinja::Error> {
            Err(minijinja::Error::new(
                ErrorKind::InvalidOperation,
                format!("The template raised an exception: {}", err_text),
            ))
        };
        environment.add_function("raise_exception", raise_exception);

        // compile the template expression in the environment
        environment.add_template_owned("main", chat_template)?;

        Ok(Self { environment })
    }

    pub(crate) fn run(
        &self,
        bos_token: &str,
        eos_token: &str,
        messages: &[ConversationEntry],
        add_generation_prompt: bool,
        image_token_count: usize,
    ) -> Result<String, minijinja::Error> {
        let ctx = context! { bos_token, eos_token, messages, add_generation_prompt, image_token_count };
        let template = self.environment.get_template("main")?;
        let result = template.render(&ctx)?;
        Ok(result)
    }
}

#[test]
fn test_glm_edge_chat_template() {
    let template = HuggingFaceChatTemplate::create(DEFAULT_GLM_EDGE_TEMPLATE).unwrap();

    let inputs = [
        ConversationEntry::user_with_image("What does the chart display?"),
        ConversationEntry::assistant("Quarterly revenue."),
        ConversationEntry::user("Which quarter is highest?"),
    ];

    let result = template.run("", "<|endoftext|>", &inputs, true, 2).unwrap();
    assert_eq!(
        result,
        "<|user|>\n<|begin_of_image|><|begin_of_image|>What does the chart display?\n<|assistant|>\nQuarterly revenue.\n<|user|>\nWhich quarter is highest?\n<|assistant|>\n"
    );
}

#[test]
fn test_generation_prompt_is_optional() {
    let template = HuggingFaceChatTemplate::create(DEFAULT_GLM_EDGE_TEMPLATE).unwrap();
    let inputs = [ConversationEntry::user_with_image("Hi")];

    let result = template.run("", "", &inputs, false, 1).unwrap();
    assert_eq!(result, "<|user|>\n<|begin_of_image|>Hi\n");
}

#[test]
fn test_templates_can_raise() {
    let template = HuggingFaceChatTemplate::create(
        "{% if messages[0]['role'] != 'system' %}{{ raise_exception('a system prompt is required') }}{% endif %}",
    )
    .unwrap();

    let err = template
        .run("", "", &[ConversationEntry::user("Hi")], true, 1)
        .unwrap_err();
    assert!(err.to_string().contains("a system prompt is required"));
}

#[test]
fn test_content_list_templates() {
    // the shape used by llava style templates in the wild
    let template = HuggingFaceChatTemplate::create(
        "{% for message in messages %}{{ message['role'].upper() ~ ': ' }}{% for content in message['content'] %}{% if content['type'] == 'image' %}{{ '<image>\\n' }}{% else %}{{ content['text'] }}{% endif %}{% endfor %}{{ '\\n' }}{% endfor %}",
    )
    .unwrap();

    let inputs = [
        ConversationEntry::user_with_image("What is the text saying?"),
        ConversationEntry::assistant("Hello."),
    ];
    let result = template.run("<s>", "</s>", &inputs, false, 1).unwrap();
    assert_eq!(
        result,
        "USER: <image>\nWhat is the text saying?\nASSISTANT: Hello.\n"
    );
}
