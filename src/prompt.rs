/// Build the grounding prompt handed to the generative model.
///
/// The template is fixed and applied verbatim: no trimming, escaping or
/// reordering, so a logged `(context, question)` pair always reproduces the
/// exact prompt.
pub fn build_prompt(context: &str, question: &str) -> String {
    format!("Context: {}\nQuestion: {}\nAnswer:", context, question)
}
